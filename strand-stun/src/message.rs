#[cfg(test)]
mod message_test;

use std::fmt;

use rand::Rng;

use shared::error::{Error, Result};

use crate::attributes::{is_known, AttrType, Attributes, RawAttribute};

/// Magic cookie distinguishing STUN packets from other protocols multiplexed
/// on the same port. Always 0x2112A442 in network byte order (RFC 8489
/// section 5).
pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;
pub const MESSAGE_HEADER_SIZE: usize = 20;
pub const TRANSACTION_ID_SIZE: usize = 12; // 96 bit

/// Setter sets an attribute on a Message.
pub trait Setter {
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

/// Getter parses an attribute from a Message.
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

/// Checker checks an attribute of a Message.
pub trait Checker {
    fn check(&self, m: &Message) -> Result<()>;
}

/// is_message returns true if b looks like a STUN message. Useful for
/// multiplexing; does not guarantee a successful decode.
pub fn is_message(b: &[u8]) -> bool {
    b.len() >= MESSAGE_HEADER_SIZE && u32::from_be_bytes([b[4], b[5], b[6], b[7]]) == MAGIC_COOKIE
}

#[derive(Default, Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    pub fn new() -> Self {
        let mut b = TransactionId([0u8; TRANSACTION_ID_SIZE]);
        rand::thread_rng().fill(&mut b.0);
        b
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_transaction_id();
        Ok(())
    }
}

/// MessageClass is an 8-bit representation of the 2-bit class of a STUN
/// Message Type.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct MessageClass(pub u8);

pub const CLASS_REQUEST: MessageClass = MessageClass(0x00);
pub const CLASS_INDICATION: MessageClass = MessageClass(0x01);
pub const CLASS_SUCCESS_RESPONSE: MessageClass = MessageClass(0x02);
pub const CLASS_ERROR_RESPONSE: MessageClass = MessageClass(0x03);

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CLASS_REQUEST => "request",
            CLASS_INDICATION => "indication",
            CLASS_SUCCESS_RESPONSE => "success response",
            CLASS_ERROR_RESPONSE => "error response",
            _ => "unknown message class",
        };
        write!(f, "{s}")
    }
}

/// Method is an 8-bit representation of the 12-bit STUN method.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct Method(pub u16);

pub const METHOD_BINDING: Method = Method(0x001);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            METHOD_BINDING => write!(f, "Binding"),
            _ => write!(f, "{:#05x}", self.0),
        }
    }
}

// Bit positions of the method and class inside the 14-bit message type
// (RFC 8489 section 5, figure 3).
const METHOD_ABITS: u16 = 0x000f; // M3..M0
const METHOD_BBITS: u16 = 0x0070; // M6..M4
const METHOD_DBITS: u16 = 0x0f80; // M11..M7
const METHOD_BSHIFT: u16 = 1;
const METHOD_DSHIFT: u16 = 2;
const C0BIT: u16 = 0x1;
const C1BIT: u16 = 0x2;
const CLASS_C0SHIFT: u16 = 4;
const CLASS_C1SHIFT: u16 = 7;

/// MessageType is the combination of a method and a class.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct MessageType {
    pub method: Method,
    pub class: MessageClass,
}

pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_REQUEST,
};
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_SUCCESS_RESPONSE,
};
pub const BINDING_ERROR_RESPONSE: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_ERROR_RESPONSE,
};
pub const BINDING_INDICATION: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_INDICATION,
};

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

impl Setter for MessageType {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.set_type(*self);
        Ok(())
    }
}

impl MessageType {
    pub fn new(method: Method, class: MessageClass) -> Self {
        Self { method, class }
    }

    /// value returns the bit representation with the class bits interleaved
    /// into the method bits.
    pub fn value(&self) -> u16 {
        let method = self.method.0;
        let a = method & METHOD_ABITS;
        let b = method & METHOD_BBITS;
        let d = method & METHOD_DBITS;
        let m = a | (b << METHOD_BSHIFT) | (d << METHOD_DSHIFT);

        let c = self.class.0 as u16;
        let c0 = (c & C0BIT) << CLASS_C0SHIFT;
        let c1 = (c & C1BIT) << CLASS_C1SHIFT;

        m | c0 | c1
    }

    /// read_value decodes the bit representation back into method and class.
    pub fn read_value(&mut self, value: u16) {
        let c0 = (value >> CLASS_C0SHIFT) & C0BIT;
        let c1 = (value >> CLASS_C1SHIFT) & C1BIT;
        self.class = MessageClass((c0 | c1) as u8);

        let a = value & METHOD_ABITS;
        let b = (value >> METHOD_BSHIFT) & METHOD_BBITS;
        let d = (value >> METHOD_DSHIFT) & METHOD_DBITS;
        self.method = Method(a | b | d);
    }
}

/// Message represents a single STUN packet. The raw buffer is kept in sync
/// with the decoded fields so re-encoding a parsed message is byte-exact.
#[derive(Default, Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32, // len(raw) not including header
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={:?}",
            self.typ,
            self.length,
            self.attributes.0.len(),
            self.transaction_id.0,
        )
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.transaction_id == other.transaction_id
            && self.length == other.length
            && self.attributes == other.attributes
    }
}

const DEFAULT_RAW_CAPACITY: usize = 120;

impl Message {
    pub fn new() -> Self {
        Message {
            raw: {
                let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
                raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
                raw
            },
            ..Default::default()
        }
    }

    /// build resets the message and applies the setters in order.
    pub fn build(&mut self, setters: &[Box<dyn Setter>]) -> Result<()> {
        self.reset();
        self.write_header();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.raw.clear();
        self.raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
        self.length = 0;
        self.attributes.0.clear();
    }

    pub fn new_transaction_id(&mut self) {
        self.transaction_id = TransactionId::new();
        self.write_transaction_id();
    }

    fn grow(&mut self, n: usize) {
        if self.raw.len() < n {
            self.raw.resize(n, 0);
        }
    }

    /// add appends a new attribute to the message, padding the value to the
    /// 4-byte boundary with zeroes.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        let alloc_size = ATTRIBUTE_HEADER_SIZE + v.len();
        let first = MESSAGE_HEADER_SIZE + self.length as usize;
        let mut last = first + alloc_size;
        self.grow(last);
        self.length += alloc_size as u32;

        let buf = &mut self.raw[first..last];
        buf[0..2].copy_from_slice(&t.value().to_be_bytes());
        buf[2..4].copy_from_slice(&(v.len() as u16).to_be_bytes());
        buf[ATTRIBUTE_HEADER_SIZE..].copy_from_slice(v);

        let padded = (v.len() + 3) & !3;
        if padded != v.len() {
            let bytes_to_add = padded - v.len();
            last += bytes_to_add;
            self.grow(last);
            for b in &mut self.raw[last - bytes_to_add..last] {
                *b = 0;
            }
            self.length += bytes_to_add as u32;
        }

        self.attributes.0.push(RawAttribute {
            typ: t,
            length: v.len() as u16,
            value: v.to_vec(),
        });
        self.write_length();
    }

    pub fn write_length(&mut self) {
        self.grow(4);
        self.raw[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
    }

    pub fn write_header(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE);
        self.write_type();
        self.write_length();
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        self.write_transaction_id();
    }

    pub fn write_transaction_id(&mut self) {
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    pub fn write_type(&mut self) {
        self.grow(2);
        self.raw[0..2].copy_from_slice(&self.typ.value().to_be_bytes());
    }

    pub fn set_type(&mut self, t: MessageType) {
        self.typ = t;
        self.write_type();
    }

    /// decode parses the raw buffer into the message fields.
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]);
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let full_size = MESSAGE_HEADER_SIZE + size;

        if cookie != MAGIC_COOKIE {
            return Err(Error::ErrInvalidMagicCookie);
        }
        if buf.len() < full_size {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        self.typ.read_value(t);
        self.length = size as u32;
        self.transaction_id
            .0
            .copy_from_slice(&buf[8..MESSAGE_HEADER_SIZE]);
        self.attributes.0.clear();

        let mut offset = 0;
        let b = &buf[MESSAGE_HEADER_SIZE..full_size];
        while offset < size {
            if size - offset < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::ErrBufferTooSmall);
            }
            let typ = AttrType(u16::from_be_bytes([b[offset], b[offset + 1]]));
            let length = u16::from_be_bytes([b[offset + 2], b[offset + 3]]);
            offset += ATTRIBUTE_HEADER_SIZE;

            let padded = ((length as usize) + 3) & !3;
            if padded > size - offset {
                return Err(Error::ErrAttributeSizeOverflow);
            }
            if typ.required() && !is_known(typ) {
                return Err(Error::ErrUnknownComprehensionRequired(typ.value()));
            }

            self.attributes.0.push(RawAttribute {
                typ,
                length,
                value: b[offset..offset + length as usize].to_vec(),
            });
            offset += padded;
        }

        Ok(())
    }

    /// Parses data into the message; the input is copied.
    pub fn unmarshal_binary(&mut self, data: &[u8]) -> Result<()> {
        self.raw.clear();
        self.raw.extend_from_slice(data);
        self.decode()
    }

    pub fn marshal_binary(&self) -> Vec<u8> {
        self.raw.clone()
    }

    /// Creates a success response for a request, keeping the transaction id.
    pub fn build_success_response(&self) -> Result<Message> {
        let mut out = Message::new();
        out.transaction_id = self.transaction_id;
        out.typ = MessageType {
            method: self.typ.method,
            class: CLASS_SUCCESS_RESPONSE,
        };
        out.write_header();
        Ok(out)
    }
}
