use shared::error::{Error, Result};

use crate::attributes::ATTR_ERROR_CODE;
use crate::message::{Getter, Message, Setter};

/// ERROR-CODE attribute (RFC 8489 section 14.8).
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ErrorCodeAttribute {
    pub code: ErrorCode,
    pub reason: Vec<u8>,
}

const ERROR_CODE_REASON_MAX_B: usize = 763;
const ERROR_CODE_MODULO: u16 = 100;

impl Setter for ErrorCodeAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        if self.reason.len() > ERROR_CODE_REASON_MAX_B {
            return Err(Error::ErrAttributeSizeOverflow);
        }

        let number = (self.code.0 % ERROR_CODE_MODULO) as u8;
        let class = (self.code.0 / ERROR_CODE_MODULO) as u8;

        let mut value = vec![0u8; 4];
        value[2] = class;
        value[3] = number;
        value.extend_from_slice(&self.reason);
        m.add(ATTR_ERROR_CODE, &value);
        Ok(())
    }
}

impl Getter for ErrorCodeAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ERROR_CODE)?;
        if v.len() < 4 {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        let class = v[2] as u16;
        let number = v[3] as u16;
        self.code = ErrorCode(class * ERROR_CODE_MODULO + number);
        self.reason = v[4..].to_vec();
        Ok(())
    }
}

/// ErrorCode is a code for the ERROR-CODE attribute.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct ErrorCode(pub u16);

pub const CODE_BAD_REQUEST: ErrorCode = ErrorCode(400);
pub const CODE_UNAUTHORIZED: ErrorCode = ErrorCode(401);
pub const CODE_UNKNOWN_ATTRIBUTE: ErrorCode = ErrorCode(420);
pub const CODE_STALE_NONCE: ErrorCode = ErrorCode(438);
pub const CODE_ROLE_CONFLICT: ErrorCode = ErrorCode(487);
pub const CODE_SERVER_ERROR: ErrorCode = ErrorCode(500);

impl ErrorCode {
    pub fn default_reason(&self) -> Result<&'static str> {
        match *self {
            CODE_BAD_REQUEST => Ok("Bad Request"),
            CODE_UNAUTHORIZED => Ok("Unauthorized"),
            CODE_UNKNOWN_ATTRIBUTE => Ok("Unknown Attribute"),
            CODE_STALE_NONCE => Ok("Stale Nonce"),
            CODE_ROLE_CONFLICT => Ok("Role Conflict"),
            CODE_SERVER_ERROR => Ok("Server Error"),
            _ => Err(Error::ErrNoDefaultReason),
        }
    }
}

impl Setter for ErrorCode {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let reason = self.default_reason()?;
        ErrorCodeAttribute {
            code: *self,
            reason: reason.as_bytes().to_vec(),
        }
        .add_to(m)
    }
}
