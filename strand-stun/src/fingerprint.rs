use crc::{Crc, CRC_32_ISO_HDLC};

use shared::error::{Error, Result};

use crate::attributes::ATTR_FINGERPRINT;
use crate::message::{Checker, Message, Setter, MESSAGE_HEADER_SIZE};

/// FINGERPRINT attribute (RFC 8489 section 14.7): CRC-32 of the message up
/// to this attribute, XORed with 0x5354554e.
#[derive(Default, Debug, Clone, Copy)]
pub struct FingerprintAttr;

pub const FINGERPRINT: FingerprintAttr = FingerprintAttr;

pub(crate) const FINGERPRINT_XOR_VALUE: u32 = 0x5354554e;
const FINGERPRINT_SIZE: usize = 4;
const FINGERPRINT_SIZE_WITH_HEADER: u32 = 8;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn fingerprint_value(b: &[u8]) -> u32 {
    CRC32.checksum(b) ^ FINGERPRINT_XOR_VALUE
}

impl Setter for FingerprintAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // The checksum covers a header whose length already includes the
        // FINGERPRINT TLV about to be appended.
        m.length += FINGERPRINT_SIZE_WITH_HEADER;
        m.write_length();
        let v = fingerprint_value(&m.raw);
        m.length -= FINGERPRINT_SIZE_WITH_HEADER;
        m.write_length();

        m.add(ATTR_FINGERPRINT, &v.to_be_bytes());
        Ok(())
    }
}

impl Checker for FingerprintAttr {
    fn check(&self, m: &Message) -> Result<()> {
        let offset = match m.attr_offset(ATTR_FINGERPRINT) {
            Some(offset) => offset,
            None => return Err(Error::ErrAttributeNotFound),
        };
        let (attr, _) = m.attributes.get(ATTR_FINGERPRINT);
        if attr.value.len() != FINGERPRINT_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        let expected = u32::from_be_bytes([attr.value[0], attr.value[1], attr.value[2], attr.value[3]]);

        let mut covered = m.raw[..offset].to_vec();
        let patched_len = (offset - MESSAGE_HEADER_SIZE) as u32 + FINGERPRINT_SIZE_WITH_HEADER;
        covered[2..4].copy_from_slice(&(patched_len as u16).to_be_bytes());

        if fingerprint_value(&covered) != expected {
            return Err(Error::ErrFingerprintMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BINDING_REQUEST;
    use crate::textattrs::TextAttribute;
    use crate::attributes::ATTR_SOFTWARE;

    #[test]
    fn test_fingerprint_check() -> Result<()> {
        let mut m = Message::new();
        m.set_type(BINDING_REQUEST);
        m.new_transaction_id();
        m.write_header();
        TextAttribute::new(ATTR_SOFTWARE, "software".to_owned()).add_to(&mut m)?;
        FINGERPRINT.add_to(&mut m)?;

        let mut decoded = Message::new();
        decoded.unmarshal_binary(&m.raw)?;
        FINGERPRINT.check(&decoded)?;
        Ok(())
    }

    #[test]
    fn test_fingerprint_mismatch_on_tamper() -> Result<()> {
        let mut m = Message::new();
        m.set_type(BINDING_REQUEST);
        m.new_transaction_id();
        m.write_header();
        FINGERPRINT.add_to(&mut m)?;

        let mut raw = m.raw.clone();
        raw[9] ^= 0xff; // flip a transaction id byte
        let mut decoded = Message::new();
        decoded.unmarshal_binary(&raw)?;
        assert_eq!(FINGERPRINT.check(&decoded), Err(Error::ErrFingerprintMismatch));
        Ok(())
    }
}
