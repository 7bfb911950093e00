//! Message framing
//!
//! ```text
//! +---------+---------+----------+---------+-----------+-------------+
//! | len u32 | type u16| flags u16| seq u32 | portid u32| payload ... |
//! +---------+---------+----------+---------+-----------+-------------+
//! ```
//!
//! Netns messages carry a 4-byte family header (`AF_UNSPEC` plus padding)
//! followed by attributes. Error messages carry the negative status code,
//! the header of the request being answered, and optional attributes.
//! `DONE` carries a zero status word.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tether_core::{Error, Result};

use crate::attr::{self, Attr, align};

/// Header size
pub const HEADER_LEN: usize = 16;
/// Family header size for netns messages
pub const FAMILY_LEN: usize = 4;
/// `AF_UNSPEC`
pub const AF_UNSPEC: u8 = 0;

/// Error or acknowledgement
pub const NLMSG_ERROR: u16 = 2;
/// End of a multipart dump
pub const NLMSG_DONE: u16 = 3;
/// Peer id allocation request, reply and notification
pub const RTM_NEWNSID: u16 = 88;
/// Peer id removal notification
pub const RTM_DELNSID: u16 = 89;
/// Peer id query or dump request
pub const RTM_GETNSID: u16 = 90;

/// Header flags
pub mod flags {
    /// Message is a request
    pub const REQUEST: u16 = 0x1;
    /// Part of a multipart reply
    pub const MULTI: u16 = 0x2;
    /// Request an acknowledgement on success
    pub const ACK: u16 = 0x4;
    /// Dump the whole table
    pub const DUMP: u16 = 0x300;
}

/// Fixed message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Total length including this header; filled in on encode
    pub len: u32,
    /// Message type
    pub kind: u16,
    /// Flags, see [`flags`]
    pub flags: u16,
    /// Sequence number echoed in replies
    pub seq: u32,
    /// Sending (or destination) port
    pub portid: u32,
}

impl Header {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len);
        buf.put_u16_le(self.kind);
        buf.put_u16_le(self.flags);
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.portid);
    }

    fn get(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(Error::invalid(format!(
                "message header needs {HEADER_LEN} bytes, got {}",
                buf.remaining()
            )));
        }
        Ok(Self {
            len: buf.get_u32_le(),
            kind: buf.get_u16_le(),
            flags: buf.get_u16_le(),
            seq: buf.get_u32_le(),
            portid: buf.get_u32_le(),
        })
    }
}

/// Decoded message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `RTM_*NSID` body
    Netns {
        /// Address family from the family header
        family: u8,
        /// Attributes
        attrs: Vec<Attr>,
    },
    /// `NLMSG_ERROR`; a zero code is an acknowledgement
    Error {
        /// Negative status code, or 0
        code: i32,
        /// Header of the request being answered
        request: Header,
        /// Extended error attributes
        attrs: Vec<Attr>,
    },
    /// `NLMSG_DONE`
    Done,
}

/// One framed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Header; `len` is recomputed by [`Message::encode`]
    pub header: Header,
    /// Body
    pub payload: Payload,
}

impl Message {
    /// Netns message of type `kind`
    #[must_use]
    pub fn netns(kind: u16, flags: u16, seq: u32, portid: u32, attrs: Vec<Attr>) -> Self {
        Self {
            header: Header {
                len: 0,
                kind,
                flags,
                seq,
                portid,
            },
            payload: Payload::Netns {
                family: AF_UNSPEC,
                attrs,
            },
        }
    }

    /// Error reply (or acknowledgement when `code` is 0) to `request`
    #[must_use]
    pub fn error(request: &Header, code: i32, attrs: Vec<Attr>) -> Self {
        Self {
            header: Header {
                len: 0,
                kind: NLMSG_ERROR,
                flags: 0,
                seq: request.seq,
                portid: request.portid,
            },
            payload: Payload::Error {
                code,
                request: *request,
                attrs,
            },
        }
    }

    /// End-of-dump marker answering `request`
    #[must_use]
    pub fn done(request: &Header) -> Self {
        Self {
            header: Header {
                len: 0,
                kind: NLMSG_DONE,
                flags: flags::MULTI,
                seq: request.seq,
                portid: request.portid,
            },
            payload: Payload::Done,
        }
    }

    /// Message type
    #[must_use]
    pub const fn kind(&self) -> u16 {
        self.header.kind
    }

    /// Whether the dump flags are set
    #[must_use]
    pub const fn is_dump(&self) -> bool {
        self.header.flags & flags::DUMP == flags::DUMP
    }

    /// Attributes of a netns or error message
    #[must_use]
    pub fn attrs(&self) -> &[Attr] {
        match &self.payload {
            Payload::Netns { attrs, .. } | Payload::Error { attrs, .. } => attrs,
            Payload::Done => &[],
        }
    }

    /// First attribute of type `kind`
    #[must_use]
    pub fn attr(&self, kind: u16) -> Option<&Attr> {
        self.attrs().iter().find(|a| a.kind() == kind)
    }

    /// Encode, filling in the length
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if an attribute or the whole
    /// message is too large for its length field
    pub fn encode(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        match &self.payload {
            Payload::Netns { family, attrs } => {
                body.put_u8(*family);
                body.put_bytes(0, FAMILY_LEN - 1);
                attr::encode_all(attrs, &mut body)?;
            }
            Payload::Error {
                code,
                request,
                attrs,
            } => {
                body.put_i32_le(*code);
                request.put(&mut body);
                attr::encode_all(attrs, &mut body)?;
            }
            Payload::Done => body.put_i32_le(0),
        }

        let len = u32::try_from(HEADER_LEN + body.len())
            .map_err(|_| Error::invalid("message too long"))?;
        let mut buf = BytesMut::with_capacity(align(HEADER_LEN + body.len()));
        Header { len, ..self.header }.put(&mut buf);
        buf.put(body);
        buf.put_bytes(0, align(buf.len()) - buf.len());
        Ok(buf.freeze())
    }

    /// Decode one message from the front of `buf`, consuming it and its
    /// padding
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for truncated or malformed input
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let header = Header::get(buf)?;
        let len = usize::try_from(header.len)
            .map_err(|_| Error::invalid("message length overflows"))?;
        if len < HEADER_LEN || len - HEADER_LEN > buf.remaining() {
            return Err(Error::invalid(format!(
                "message length {len} does not match {} available bytes",
                buf.remaining() + HEADER_LEN
            )));
        }
        let mut body = buf.split_to(len - HEADER_LEN);
        buf.advance((align(len) - len).min(buf.remaining()));

        let payload = match header.kind {
            NLMSG_ERROR => {
                if body.remaining() < 4 + HEADER_LEN {
                    return Err(Error::invalid("error message too short"));
                }
                let code = body.get_i32_le();
                let request = Header::get(&mut body)?;
                Payload::Error {
                    code,
                    request,
                    attrs: attr::decode_all(body)?,
                }
            }
            NLMSG_DONE => Payload::Done,
            _ => {
                if body.remaining() < FAMILY_LEN {
                    return Err(Error::invalid("missing family header"));
                }
                let family = body.get_u8();
                body.advance(FAMILY_LEN - 1);
                Payload::Netns {
                    family,
                    attrs: attr::decode_all(body)?,
                }
            }
        };
        Ok(Self { header, payload })
    }

    /// Decode every message in `buf`
    ///
    /// # Errors
    /// See [`Message::decode`]
    pub fn decode_all(mut buf: Bytes) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        while buf.has_remaining() {
            out.push(Self::decode(&mut buf)?);
        }
        Ok(out)
    }
}

/// Encode a sequence of messages back to back
///
/// # Errors
/// See [`Message::encode`]
pub fn encode_all(messages: &[Message]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    for msg in messages {
        buf.put(msg.encode()?);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{NETNSA_NSID, NETNSA_PID, NLMSGERR_ATTR_MSG};

    #[test]
    fn test_netns_layout() {
        let msg = Message::netns(
            RTM_NEWNSID,
            flags::REQUEST | flags::ACK,
            7,
            100,
            vec![Attr::i32(NETNSA_NSID, 5), Attr::u32(NETNSA_PID, 42)],
        );
        let wire = msg.encode().unwrap();

        assert_eq!(wire.len(), HEADER_LEN + FAMILY_LEN + 8 + 8);
        assert_eq!(&wire[..4], &36u32.to_le_bytes());
        assert_eq!(&wire[4..6], &88u16.to_le_bytes());
        assert_eq!(&wire[6..8], &5u16.to_le_bytes());

        let mut buf = wire;
        let back = Message::decode(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(back.attr(NETNSA_NSID).unwrap().as_i32().unwrap(), 5);
        assert_eq!(back.header.len, 36);
    }

    #[test]
    fn test_error_carries_request_header() {
        let request = Header {
            len: 20,
            kind: RTM_GETNSID,
            flags: flags::REQUEST,
            seq: 9,
            portid: 3,
        };
        let reply = Message::error(&request, -22, vec![Attr::string(NLMSGERR_ATTR_MSG, "bad")]);
        let mut wire = reply.encode().unwrap();
        let back = Message::decode(&mut wire).unwrap();

        match back.payload {
            Payload::Error { code, request: echoed, ref attrs } => {
                assert_eq!(code, -22);
                assert_eq!(echoed, request);
                assert_eq!(attrs[0].as_str().unwrap(), "bad");
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(back.header.seq, 9);
    }

    #[test]
    fn test_stream_of_messages() {
        let request = Header::default();
        let stream = encode_all(&[
            Message::netns(RTM_NEWNSID, flags::MULTI, 1, 0, vec![Attr::i32(NETNSA_NSID, 0)]),
            Message::done(&request),
        ])
        .unwrap();

        let decoded = Message::decode_all(stream).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].kind(), NLMSG_DONE);
        assert_eq!(decoded[1].payload, Payload::Done);
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let wire = Message::netns(RTM_GETNSID, 0, 0, 0, vec![]).encode().unwrap();
        let mut short = wire.slice(..wire.len() - 1);
        assert!(Message::decode(&mut short).is_err());
        assert!(Message::decode(&mut Bytes::from_static(&[1, 2, 3])).is_err());
    }

    #[test]
    fn test_dump_flag() {
        let msg = Message::netns(RTM_GETNSID, flags::REQUEST | flags::DUMP, 0, 0, vec![]);
        assert!(msg.is_dump());
        assert!(!Message::netns(RTM_GETNSID, flags::REQUEST, 0, 0, vec![]).is_dump());
    }
}
