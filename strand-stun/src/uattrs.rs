use shared::error::{Error, Result};

use crate::attributes::{AttrType, ATTR_UNKNOWN_ATTRIBUTES};
use crate::message::{Getter, Message, Setter};

/// UNKNOWN-ATTRIBUTES attribute (RFC 8489 section 14.9): a list of 16-bit
/// attribute types the server did not understand.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct UnknownAttributes(pub Vec<AttrType>);

impl Setter for UnknownAttributes {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = Vec::with_capacity(self.0.len() * 2);
        for t in &self.0 {
            v.extend_from_slice(&t.value().to_be_bytes());
        }
        m.add(ATTR_UNKNOWN_ATTRIBUTES, &v);
        Ok(())
    }
}

impl Getter for UnknownAttributes {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_UNKNOWN_ATTRIBUTES)?;
        if v.len() % 2 != 0 {
            return Err(Error::ErrBadUnknownAttrsSize);
        }
        self.0.clear();
        for chunk in v.chunks_exact(2) {
            self.0.push(AttrType(u16::from_be_bytes([chunk[0], chunk[1]])));
        }
        Ok(())
    }
}
