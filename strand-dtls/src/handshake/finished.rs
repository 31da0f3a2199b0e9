use bytes::Buf;

use shared::error::{Error, Result};

/// Finished (RFC 5246 section 7.4.9): 12 bytes of PRF output over the
/// handshake transcript, sent under the new epoch.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(self.verify_data.clone())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 12 {
            return Err(Error::ErrBufferTooSmall);
        }
        Ok(Finished {
            verify_data: buf.copy_to_bytes(buf.remaining()).to_vec(),
        })
    }
}

/// ServerHelloDone: empty body closing the server's first flight.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ServerHelloDone;

impl ServerHelloDone {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(vec![])
    }

    pub fn unmarshal<B: Buf>(_buf: &mut B) -> Result<Self> {
        Ok(ServerHelloDone)
    }
}
