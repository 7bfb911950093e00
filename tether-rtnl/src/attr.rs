//! Type-length-value attribute codec
//!
//! Each attribute is `len: u16, type: u16, payload`, little endian, where
//! `len` covers the 4-byte header plus the payload. The next attribute
//! starts at the next 4-byte boundary.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tether_core::{Error, NsId, Result};

/// Attribute header size
pub const ATTR_HEADER_LEN: usize = 4;

/// Alignment of attributes and messages
pub const ALIGNTO: usize = 4;

/// Peer id (`i32`)
pub const NETNSA_NSID: u16 = 1;
/// Process whose namespace is meant (`u32`)
pub const NETNSA_PID: u16 = 2;
/// Handle referring to a namespace (`u32`)
pub const NETNSA_FD: u16 = 3;
/// Namespace, named by peer id, whose table answers the request (`i32`)
pub const NETNSA_TARGET_NSID: u16 = 4;
/// Id the caller's own namespace uses for the same peer (`i32`)
pub const NETNSA_CURRENT_NSID: u16 = 5;

/// Human-readable error text in an error reply
pub const NLMSGERR_ATTR_MSG: u16 = 1;
/// Type of the offending attribute in an error reply (`u32`)
pub const NLMSGERR_ATTR_BAD_ATTR: u16 = 2;

/// Round `len` up to the attribute alignment
#[must_use]
pub const fn align(len: usize) -> usize {
    (len + ALIGNTO - 1) & !(ALIGNTO - 1)
}

/// One decoded attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    kind: u16,
    payload: Bytes,
}

impl Attr {
    /// Attribute with an arbitrary payload
    #[must_use]
    pub fn new(kind: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Signed 32-bit attribute
    #[must_use]
    pub fn i32(kind: u16, value: i32) -> Self {
        Self::new(kind, Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    /// Unsigned 32-bit attribute
    #[must_use]
    pub fn u32(kind: u16, value: u32) -> Self {
        Self::new(kind, Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    /// NUL-terminated string attribute
    #[must_use]
    pub fn string(kind: u16, value: &str) -> Self {
        let mut buf = BytesMut::with_capacity(value.len() + 1);
        buf.put_slice(value.as_bytes());
        buf.put_u8(0);
        Self::new(kind, buf.freeze())
    }

    /// Peer-id attribute; `None` encodes as "not assigned"
    #[must_use]
    pub fn nsid(kind: u16, id: Option<NsId>) -> Self {
        Self::i32(kind, NsId::to_wire(id))
    }

    /// Attribute type
    #[must_use]
    pub const fn kind(&self) -> u16 {
        self.kind
    }

    /// Raw payload
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as `i32`
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] unless the payload is 4 bytes
    pub fn as_i32(&self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.word()?))
    }

    /// Payload as `u32`
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] unless the payload is 4 bytes
    pub fn as_u32(&self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.word()?))
    }

    /// Payload as a string, without the trailing NUL
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for invalid UTF-8
    pub fn as_str(&self) -> Result<&str> {
        let raw = self.payload.strip_suffix(&[0u8]).unwrap_or(&self.payload[..]);
        std::str::from_utf8(raw)
            .map_err(|e| Error::invalid(format!("attribute {} is not UTF-8: {e}", self.kind)))
    }

    fn word(&self) -> Result<[u8; 4]> {
        <[u8; 4]>::try_from(&self.payload[..]).map_err(|_| {
            Error::invalid(format!(
                "attribute {} has length {}, expected 4",
                self.kind,
                self.payload.len()
            ))
        })
    }

    /// Encoded size including padding
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        align(ATTR_HEADER_LEN + self.payload.len())
    }

    /// Append the encoded attribute to `buf`
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the payload does not fit a
    /// 16-bit length
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let len = u16::try_from(ATTR_HEADER_LEN + self.payload.len())
            .map_err(|_| Error::invalid(format!("attribute {} is too long", self.kind)))?;
        buf.put_u16_le(len);
        buf.put_u16_le(self.kind);
        buf.put_slice(&self.payload);
        buf.put_bytes(0, self.encoded_len() - usize::from(len));
        Ok(())
    }
}

/// Encode a list of attributes
///
/// # Errors
/// See [`Attr::encode`]
pub fn encode_all(attrs: &[Attr], buf: &mut BytesMut) -> Result<()> {
    attrs.iter().try_for_each(|a| a.encode(buf))
}

/// Decode every attribute in `buf`
///
/// # Errors
/// Returns [`Error::InvalidArgument`] for a truncated or overlong attribute
pub fn decode_all(mut buf: Bytes) -> Result<Vec<Attr>> {
    let mut attrs = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < ATTR_HEADER_LEN {
            return Err(Error::invalid(format!(
                "{} trailing bytes after last attribute",
                buf.remaining()
            )));
        }
        let len = usize::from(buf.get_u16_le());
        let kind = buf.get_u16_le();
        if len < ATTR_HEADER_LEN || len - ATTR_HEADER_LEN > buf.remaining() {
            return Err(Error::invalid(format!(
                "attribute {kind} has invalid length {len}"
            )));
        }
        let payload = buf.split_to(len - ATTR_HEADER_LEN);
        let pad = (align(len) - len).min(buf.remaining());
        buf.advance(pad);
        attrs.push(Attr { kind, payload });
    }
    Ok(attrs)
}

/// Attributes of a netns request, by type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetnsAttrs {
    /// `NETNSA_NSID`
    pub nsid: Option<i32>,
    /// `NETNSA_PID`
    pub pid: Option<u32>,
    /// `NETNSA_FD`
    pub fd: Option<u32>,
    /// `NETNSA_TARGET_NSID`
    pub target_nsid: Option<i32>,
    /// Every attribute type present, in wire order, including unknown ones
    pub present: Vec<u16>,
}

impl NetnsAttrs {
    /// Pick the request attributes out of `attrs`.
    ///
    /// `NETNSA_CURRENT_NSID` only appears in replies; like unknown types it
    /// is recorded in `present` and otherwise ignored.
    ///
    /// A later occurrence of the same type overrides an earlier one.
    ///
    /// # Errors
    /// Returns the offending attribute type together with
    /// [`Error::InvalidArgument`] when a known attribute has the wrong size
    pub fn parse(attrs: &[Attr]) -> std::result::Result<Self, (u16, Error)> {
        let mut out = Self::default();
        for attr in attrs {
            let kind = attr.kind();
            out.present.push(kind);
            let failed = |e: Error| (kind, e);
            match kind {
                NETNSA_NSID => out.nsid = Some(attr.as_i32().map_err(failed)?),
                NETNSA_PID => out.pid = Some(attr.as_u32().map_err(failed)?),
                NETNSA_FD => out.fd = Some(attr.as_u32().map_err(failed)?),
                NETNSA_TARGET_NSID => out.target_nsid = Some(attr.as_i32().map_err(failed)?),
                _ => {}
            }
        }
        Ok(out)
    }

    /// First attribute type not in `allowed`
    #[must_use]
    pub fn first_unsupported(&self, allowed: &[u16]) -> Option<u16> {
        self.present.iter().copied().find(|k| !allowed.contains(k))
    }
}
