use std::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use shared::error::{Error, Result};

use crate::attributes::{ATTR_FINGERPRINT, ATTR_MESSAGE_INTEGRITY};
use crate::message::{Checker, Message, Setter, MESSAGE_HEADER_SIZE};

type HmacSha1 = Hmac<Sha1>;

pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;
const MESSAGE_INTEGRITY_SIZE_WITH_HEADER: u32 = 24;

/// MESSAGE-INTEGRITY attribute (RFC 8489 section 14.5): HMAC-SHA1 over the
/// message up to (and with the length field covering) this attribute.
///
/// For ICE short-term credentials the key is the raw password.
#[derive(Default, Clone)]
pub struct MessageIntegrity(pub Vec<u8>);

impl fmt::Display for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{:x?}", self.0)
    }
}

fn hmac_sha1(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|e| Error::Other(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl MessageIntegrity {
    /// Creates a new short-term credential integrity key (RFC 8489 section
    /// 9.1.1): the key is the password itself.
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.into_bytes())
    }
}

impl Setter for MessageIntegrity {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // The HMAC covers a header whose length already includes the
        // MESSAGE-INTEGRITY TLV about to be appended.
        m.length += MESSAGE_INTEGRITY_SIZE_WITH_HEADER;
        m.write_length();
        let v = hmac_sha1(&self.0, &m.raw)?;
        m.length -= MESSAGE_INTEGRITY_SIZE_WITH_HEADER;
        m.write_length();

        m.add(ATTR_MESSAGE_INTEGRITY, &v);
        Ok(())
    }
}

impl Checker for MessageIntegrity {
    fn check(&self, m: &Message) -> Result<()> {
        let integrity_offset = match m.attr_offset(ATTR_MESSAGE_INTEGRITY) {
            Some(offset) => offset,
            None => return Err(Error::ErrAttributeNotFound),
        };

        // FINGERPRINT, if present, must come after MESSAGE-INTEGRITY.
        if let Some(fp_offset) = m.attr_offset(ATTR_FINGERPRINT) {
            if fp_offset < integrity_offset {
                return Err(Error::ErrFingerprintBeforeIntegrity);
            }
        }

        let (expected, ok) = m.attributes.get(ATTR_MESSAGE_INTEGRITY);
        if !ok || expected.value.len() != MESSAGE_INTEGRITY_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        let mut covered = m.raw[..integrity_offset].to_vec();
        let patched_len =
            (integrity_offset - MESSAGE_HEADER_SIZE) as u32 + MESSAGE_INTEGRITY_SIZE_WITH_HEADER;
        covered[2..4].copy_from_slice(&(patched_len as u16).to_be_bytes());

        let actual = hmac_sha1(&self.0, &covered)?;
        if actual.as_slice().ct_eq(expected.value.as_slice()).unwrap_u8() != 1 {
            return Err(Error::ErrIntegrityMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, BINDING_REQUEST};
    use crate::textattrs::TextAttribute;
    use crate::attributes::ATTR_USERNAME;

    #[test]
    fn test_message_integrity_round_trip() -> Result<()> {
        let i = MessageIntegrity::new_short_term_integrity("pwd".to_owned());
        let mut m = Message::new();
        m.set_type(BINDING_REQUEST);
        m.new_transaction_id();
        m.write_header();
        TextAttribute::new(ATTR_USERNAME, "user".to_owned()).add_to(&mut m)?;
        i.add_to(&mut m)?;

        let mut decoded = Message::new();
        decoded.unmarshal_binary(&m.raw)?;
        i.check(&decoded)?;
        Ok(())
    }

    #[test]
    fn test_message_integrity_wrong_key() -> Result<()> {
        let i = MessageIntegrity::new_short_term_integrity("pwd".to_owned());
        let mut m = Message::new();
        m.set_type(BINDING_REQUEST);
        m.new_transaction_id();
        m.write_header();
        i.add_to(&mut m)?;

        let wrong = MessageIntegrity::new_short_term_integrity("not-pwd".to_owned());
        let mut decoded = Message::new();
        decoded.unmarshal_binary(&m.raw)?;
        assert_eq!(wrong.check(&decoded), Err(Error::ErrIntegrityMismatch));
        Ok(())
    }

    #[test]
    fn test_message_type_value() {
        let mt = MessageType::default();
        assert_eq!(mt.value(), 0);
    }
}
