use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};

/// A (stream, stream sequence) pair skipped by a FORWARD TSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardTsnStream {
    pub identifier: u16,
    pub sequence: u16,
}

/// FORWARD TSN (RFC 3758 section 3.2): moves the peer's cumulative TSN
/// past abandoned chunks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkForwardTsn {
    pub new_cumulative_tsn: u32,
    pub streams: Vec<ForwardTsnStream>,
}

impl ChunkForwardTsn {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u32(self.new_cumulative_tsn);
        for stream in &self.streams {
            out.put_u16(stream.identifier);
            out.put_u16(stream.sequence);
        }
        Ok(out)
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::ErrChunkTooShort);
        }
        let new_cumulative_tsn = buf.get_u32();
        let mut streams = vec![];
        while buf.remaining() >= 4 {
            streams.push(ForwardTsnStream {
                identifier: buf.get_u16(),
                sequence: buf.get_u16(),
            });
        }
        Ok(ChunkForwardTsn {
            new_cumulative_tsn,
            streams,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn test_forward_tsn_round_trip() -> Result<()> {
        let fwd = ChunkForwardTsn {
            new_cumulative_tsn: 3,
            streams: vec![ForwardTsnStream {
                identifier: 1,
                sequence: 2,
            }],
        };
        let mut raw = vec![];
        Chunk::ForwardTsn(fwd.clone()).marshal(&mut raw)?;
        let (decoded, _) = Chunk::unmarshal(&Bytes::from(raw))?;
        assert_eq!(decoded, Chunk::ForwardTsn(fwd));
        Ok(())
    }
}
