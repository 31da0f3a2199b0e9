use bytes::{Buf, BufMut};

use shared::error::{Error, Result};

pub const EXTENSION_SUPPORTED_GROUPS: u16 = 10;
pub const EXTENSION_SUPPORTED_POINT_FORMATS: u16 = 11;
pub const EXTENSION_SIGNATURE_ALGORITHMS: u16 = 13;
pub const EXTENSION_USE_SRTP: u16 = 14;
pub const EXTENSION_EXTENDED_MASTER_SECRET: u16 = 23;
pub const EXTENSION_RENEGOTIATION_INFO: u16 = 65281;

pub const NAMED_CURVE_P256: u16 = 0x0017;
pub const POINT_FORMAT_UNCOMPRESSED: u8 = 0;

/// ecdsa_secp256r1_sha256
pub const SIGNATURE_SCHEME_ECDSA_SECP256R1_SHA256: u16 = 0x0403;

/// SRTP protection profiles carried in the use_srtp extension (RFC 5764).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum SrtpProtectionProfile {
    #[default]
    Unsupported = 0x0000,
    AeadAes128Gcm = 0x0007,
    AeadAes256Gcm = 0x0008,
}

impl From<u16> for SrtpProtectionProfile {
    fn from(v: u16) -> Self {
        match v {
            0x0007 => SrtpProtectionProfile::AeadAes128Gcm,
            0x0008 => SrtpProtectionProfile::AeadAes256Gcm,
            _ => SrtpProtectionProfile::Unsupported,
        }
    }
}

/// The handshake extensions this implementation understands; everything
/// else is carried opaquely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extension {
    /// supported_groups (RFC 8422): named curves offered for ECDHE.
    SupportedGroups(Vec<u16>),
    /// ec_point_formats (RFC 8422).
    SupportedPointFormats(Vec<u8>),
    /// signature_algorithms (RFC 5246 section 7.4.1.4.1).
    SignatureAlgorithms(Vec<u16>),
    /// use_srtp (RFC 5764): SRTP protection profiles plus MKI.
    UseSrtp(Vec<SrtpProtectionProfile>),
    /// extended_master_secret (RFC 7627), empty body.
    ExtendedMasterSecret,
    /// renegotiation_info (RFC 5746), empty renegotiated_connection.
    RenegotiationInfo,
    Unknown { typ: u16, data: Vec<u8> },
}

impl Extension {
    pub fn typ(&self) -> u16 {
        match self {
            Extension::SupportedGroups(_) => EXTENSION_SUPPORTED_GROUPS,
            Extension::SupportedPointFormats(_) => EXTENSION_SUPPORTED_POINT_FORMATS,
            Extension::SignatureAlgorithms(_) => EXTENSION_SIGNATURE_ALGORITHMS,
            Extension::UseSrtp(_) => EXTENSION_USE_SRTP,
            Extension::ExtendedMasterSecret => EXTENSION_EXTENDED_MASTER_SECRET,
            Extension::RenegotiationInfo => EXTENSION_RENEGOTIATION_INFO,
            Extension::Unknown { typ, .. } => *typ,
        }
    }

    pub fn marshal(&self, out: &mut Vec<u8>) {
        out.put_u16(self.typ());
        match self {
            Extension::SupportedGroups(groups) => {
                out.put_u16((2 + groups.len() * 2) as u16);
                out.put_u16((groups.len() * 2) as u16);
                for g in groups {
                    out.put_u16(*g);
                }
            }
            Extension::SupportedPointFormats(formats) => {
                out.put_u16((1 + formats.len()) as u16);
                out.put_u8(formats.len() as u8);
                for f in formats {
                    out.put_u8(*f);
                }
            }
            Extension::SignatureAlgorithms(algs) => {
                out.put_u16((2 + algs.len() * 2) as u16);
                out.put_u16((algs.len() * 2) as u16);
                for a in algs {
                    out.put_u16(*a);
                }
            }
            Extension::UseSrtp(profiles) => {
                out.put_u16((2 + profiles.len() * 2 + 1) as u16);
                out.put_u16((profiles.len() * 2) as u16);
                for p in profiles {
                    out.put_u16(*p as u16);
                }
                out.put_u8(0); // no MKI
            }
            Extension::ExtendedMasterSecret | Extension::RenegotiationInfo => {
                if matches!(self, Extension::RenegotiationInfo) {
                    out.put_u16(1);
                    out.put_u8(0);
                } else {
                    out.put_u16(0);
                }
            }
            Extension::Unknown { data, .. } => {
                out.put_u16(data.len() as u16);
                out.put_slice(data);
            }
        }
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::ErrBufferTooSmall);
        }
        let typ = buf.get_u16();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(Error::ErrBufferTooSmall);
        }

        match typ {
            EXTENSION_SUPPORTED_GROUPS => {
                if len < 2 {
                    return Err(Error::ErrBufferTooSmall);
                }
                let list_len = buf.get_u16() as usize;
                if list_len + 2 != len || list_len % 2 != 0 {
                    return Err(Error::ErrLengthMismatch);
                }
                let mut groups = Vec::with_capacity(list_len / 2);
                for _ in 0..list_len / 2 {
                    groups.push(buf.get_u16());
                }
                Ok(Extension::SupportedGroups(groups))
            }
            EXTENSION_SUPPORTED_POINT_FORMATS => {
                if len < 1 {
                    return Err(Error::ErrBufferTooSmall);
                }
                let list_len = buf.get_u8() as usize;
                if list_len + 1 != len {
                    return Err(Error::ErrLengthMismatch);
                }
                let mut formats = Vec::with_capacity(list_len);
                for _ in 0..list_len {
                    formats.push(buf.get_u8());
                }
                Ok(Extension::SupportedPointFormats(formats))
            }
            EXTENSION_SIGNATURE_ALGORITHMS => {
                if len < 2 {
                    return Err(Error::ErrBufferTooSmall);
                }
                let list_len = buf.get_u16() as usize;
                if list_len + 2 != len || list_len % 2 != 0 {
                    return Err(Error::ErrLengthMismatch);
                }
                let mut algs = Vec::with_capacity(list_len / 2);
                for _ in 0..list_len / 2 {
                    algs.push(buf.get_u16());
                }
                Ok(Extension::SignatureAlgorithms(algs))
            }
            EXTENSION_USE_SRTP => {
                if len < 3 {
                    return Err(Error::ErrBufferTooSmall);
                }
                let list_len = buf.get_u16() as usize;
                if list_len % 2 != 0 || len < 2 + list_len + 1 {
                    return Err(Error::ErrLengthMismatch);
                }
                let mut profiles = Vec::with_capacity(list_len / 2);
                for _ in 0..list_len / 2 {
                    profiles.push(SrtpProtectionProfile::from(buf.get_u16()));
                }
                let mki_len = buf.get_u8() as usize;
                if buf.remaining() < mki_len {
                    return Err(Error::ErrBufferTooSmall);
                }
                buf.advance(mki_len);
                Ok(Extension::UseSrtp(profiles))
            }
            EXTENSION_EXTENDED_MASTER_SECRET => {
                buf.advance(len);
                Ok(Extension::ExtendedMasterSecret)
            }
            EXTENSION_RENEGOTIATION_INFO => {
                buf.advance(len);
                Ok(Extension::RenegotiationInfo)
            }
            _ => {
                let data = buf.copy_to_bytes(len).to_vec();
                Ok(Extension::Unknown { typ, data })
            }
        }
    }

    /// Serializes an extension list with its two-byte total length prefix.
    pub fn marshal_list(extensions: &[Extension], out: &mut Vec<u8>) {
        let mut body = Vec::new();
        for ext in extensions {
            ext.marshal(&mut body);
        }
        out.put_u16(body.len() as u16);
        out.put_slice(&body);
    }

    /// Parses an extension list preceded by its two-byte total length.
    pub fn unmarshal_list<B: Buf>(buf: &mut B) -> Result<Vec<Extension>> {
        if buf.remaining() == 0 {
            // extensions are optional
            return Ok(vec![]);
        }
        if buf.remaining() < 2 {
            return Err(Error::ErrBufferTooSmall);
        }
        let total = buf.get_u16() as usize;
        if buf.remaining() < total {
            return Err(Error::ErrBufferTooSmall);
        }
        let mut body = buf.copy_to_bytes(total);
        let mut out = vec![];
        while body.remaining() > 0 {
            out.push(Extension::unmarshal(&mut body)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_list_round_trip() -> Result<()> {
        let extensions = vec![
            Extension::SupportedGroups(vec![NAMED_CURVE_P256]),
            Extension::SupportedPointFormats(vec![POINT_FORMAT_UNCOMPRESSED]),
            Extension::SignatureAlgorithms(vec![SIGNATURE_SCHEME_ECDSA_SECP256R1_SHA256]),
            Extension::UseSrtp(vec![SrtpProtectionProfile::AeadAes128Gcm]),
            Extension::ExtendedMasterSecret,
            Extension::RenegotiationInfo,
            Extension::Unknown {
                typ: 0x1234,
                data: vec![1, 2, 3],
            },
        ];

        let mut raw = Vec::new();
        Extension::marshal_list(&extensions, &mut raw);
        let mut buf = &raw[..];
        let decoded = Extension::unmarshal_list(&mut buf)?;
        assert_eq!(decoded, extensions);
        Ok(())
    }
}
