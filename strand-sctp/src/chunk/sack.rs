use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};

/// One gap ack block, offsets relative to the cumulative TSN ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

/// SACK (RFC 4960 section 3.3.4).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkSelectiveAck {
    pub cumulative_tsn_ack: u32,
    pub advertised_receiver_window_credit: u32,
    pub gap_ack_blocks: Vec<GapAckBlock>,
    pub duplicate_tsn: Vec<u32>,
}

impl ChunkSelectiveAck {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u32(self.cumulative_tsn_ack);
        out.put_u32(self.advertised_receiver_window_credit);
        out.put_u16(self.gap_ack_blocks.len() as u16);
        out.put_u16(self.duplicate_tsn.len() as u16);
        for block in &self.gap_ack_blocks {
            out.put_u16(block.start);
            out.put_u16(block.end);
        }
        for dup in &self.duplicate_tsn {
            out.put_u32(*dup);
        }
        Ok(out)
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 12 {
            return Err(Error::ErrChunkTooShort);
        }
        let cumulative_tsn_ack = buf.get_u32();
        let advertised_receiver_window_credit = buf.get_u32();
        let num_gaps = buf.get_u16() as usize;
        let num_dups = buf.get_u16() as usize;

        if buf.remaining() < num_gaps * 4 + num_dups * 4 {
            return Err(Error::ErrChunkTooShort);
        }
        let mut gap_ack_blocks = Vec::with_capacity(num_gaps);
        for _ in 0..num_gaps {
            gap_ack_blocks.push(GapAckBlock {
                start: buf.get_u16(),
                end: buf.get_u16(),
            });
        }
        let mut duplicate_tsn = Vec::with_capacity(num_dups);
        for _ in 0..num_dups {
            duplicate_tsn.push(buf.get_u32());
        }

        Ok(ChunkSelectiveAck {
            cumulative_tsn_ack,
            advertised_receiver_window_credit,
            gap_ack_blocks,
            duplicate_tsn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn test_sack_round_trip() -> Result<()> {
        let sack = ChunkSelectiveAck {
            cumulative_tsn_ack: 1000,
            advertised_receiver_window_credit: 64 * 1024,
            gap_ack_blocks: vec![GapAckBlock { start: 2, end: 3 }, GapAckBlock { start: 5, end: 5 }],
            duplicate_tsn: vec![999],
        };
        let mut raw = vec![];
        Chunk::Sack(sack.clone()).marshal(&mut raw)?;
        let (decoded, _) = Chunk::unmarshal(&Bytes::from(raw))?;
        assert_eq!(decoded, Chunk::Sack(sack));
        Ok(())
    }
}
