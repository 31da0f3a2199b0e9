use std::fmt;

use shared::error::{Error, Result};

use crate::attributes::{AttrType, ATTR_REALM, ATTR_SOFTWARE, ATTR_USERNAME};
use crate::message::{Getter, Message, Setter};

const MAX_USERNAME_B: usize = 513;
const MAX_REALM_B: usize = 763;
const MAX_SOFTWARE_B: usize = 763;

/// TextAttribute is a helper for adding and parsing UTF-8 string attributes.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct TextAttribute {
    pub attr: AttrType,
    pub text: String,
}

/// USERNAME attribute (RFC 8489 section 14.3): "remote-ufrag:local-ufrag"
/// during ICE connectivity checks.
pub type Username = TextAttribute;

impl fmt::Display for TextAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl Setter for TextAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let max_len = match self.attr {
            ATTR_USERNAME => MAX_USERNAME_B,
            ATTR_REALM => MAX_REALM_B,
            ATTR_SOFTWARE => MAX_SOFTWARE_B,
            _ => usize::MAX,
        };

        let text = self.text.as_bytes();
        if text.len() > max_len {
            return Err(Error::ErrAttributeSizeOverflow);
        }
        m.add(self.attr, text);
        Ok(())
    }
}

impl TextAttribute {
    pub fn new(attr: AttrType, text: String) -> Self {
        TextAttribute { attr, text }
    }

    pub fn get_from_as(&mut self, m: &Message, attr: AttrType) -> Result<()> {
        self.attr = attr;
        let a = m.get(attr)?;
        self.text = String::from_utf8(a)?;
        Ok(())
    }
}

impl Getter for TextAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let attr = self.attr;
        self.get_from_as(m, attr)
    }
}
