use bytes::Bytes;

use shared::error::Result;

use crate::param::Param;

/// RE-CONFIG (RFC 6525 section 3.1): carries stream reset request and
/// response parameters. WebRTC uses it to close data channels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkReconfig {
    pub param_a: Option<Param>,
    pub param_b: Option<Param>,
}

impl ChunkReconfig {
    pub(crate) fn marshal_value(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(param) = &self.param_a {
            param.marshal(&mut out);
        }
        if let Some(param) = &self.param_b {
            while out.len() % 4 != 0 {
                out.push(0);
            }
            param.marshal(&mut out);
        }
        Ok(out)
    }

    pub(crate) fn unmarshal_value(buf: &mut Bytes) -> Result<Self> {
        let mut params = Param::unmarshal_list(buf)?.into_iter();
        Ok(ChunkReconfig {
            param_a: params.next(),
            param_b: params.next(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn test_reconfig_round_trip() -> Result<()> {
        let reconfig = ChunkReconfig {
            param_a: Some(Param::OutgoingResetRequest {
                request_sequence: 10,
                response_sequence: 9,
                last_tsn: 100,
                stream_identifiers: vec![1, 3],
            }),
            param_b: Some(Param::ReconfigResponse {
                response_sequence: 10,
                result: 1,
            }),
        };
        let mut raw = vec![];
        Chunk::Reconfig(reconfig.clone()).marshal(&mut raw)?;
        let (decoded, _) = Chunk::unmarshal(&Bytes::from(raw))?;
        assert_eq!(decoded, Chunk::Reconfig(reconfig));
        Ok(())
    }
}
