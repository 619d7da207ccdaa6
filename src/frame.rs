//! The on-wire layout of one datagram. All numbers are in network byte order (BE):
//!
//! ```ascii
//! 0: length (u32) - number of bytes after this field. Present only when the length
//!     check is enabled.
//! *: ack block - present only when acknowledgment is requested:
//!     0:  ack id (16 bytes) - correlation id minted by the sender for this send
//!     16: ack host length (u8)
//!     17: ack host (UTF-8 host name or literal IP the receiver acknowledges to)
//!     *:  ack port (u16)
//! *: payload - all remaining bytes
//! ```
//!
//! Both optional parts are a configuration-level contract between the endpoints - nothing in
//!  the frame says whether they are present. The payload is always the trailing bytes of the
//!  frame, whatever the configuration.
//!
//! The acknowledgment itself is not framed: it is a separate datagram whose entire payload is
//!  the textual form of the ack id, sent to the embedded ack host and port.

use crate::error::FrameError;
use bytes::{Buf, BufMut, Bytes};
use std::fmt::Debug;
use uuid::Uuid;

/// Correlation id tying an acknowledgment datagram back to the send that requested it.
///  Minted fresh per acknowledged send, unique within the process lifetime.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct AckId(Uuid);

impl AckId {
    pub const WIRE_LEN: usize = 16;

    pub fn new() -> AckId {
        AckId(Uuid::new_v4())
    }

    /// Parses the payload of an acknowledgment datagram, i.e. the textual form of the id.
    pub fn from_reply_payload(payload: &[u8]) -> Option<AckId> {
        let s = std::str::from_utf8(payload).ok()?;
        Uuid::try_parse(s).ok().map(AckId)
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.0.as_bytes());
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<AckId, FrameError> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(FrameError::Truncated("ack id"));
        }
        let mut raw = [0u8; Self::WIRE_LEN];
        buf.copy_to_slice(&mut raw);
        Ok(AckId(Uuid::from_bytes(raw)))
    }
}
impl Default for AckId {
    fn default() -> Self {
        AckId::new()
    }
}
impl Debug for AckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for AckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where and under which id the receiver should acknowledge a datagram.
#[derive(Clone, Eq, PartialEq)]
pub struct AckHeader {
    pub id: AckId,
    pub host: String,
    pub port: u16,
}
impl Debug for AckHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ACK{{{}@{}:{}}}", self.id, self.host, self.port)
    }
}

impl AckHeader {
    pub fn new(id: AckId, host: impl Into<String>, port: u16) -> AckHeader {
        AckHeader {
            id,
            host: host.into(),
            port,
        }
    }

    /// The exact bytes a receiver sends back to acknowledge this frame.
    pub fn reply_payload(&self) -> Vec<u8> {
        self.id.to_string().into_bytes()
    }

    fn serialized_len(&self) -> usize {
        AckId::WIRE_LEN + size_of::<u8>() + self.host.len() + size_of::<u16>()
    }

    fn ser(&self, buf: &mut impl BufMut) -> Result<(), FrameError> {
        if self.host.len() > u8::MAX as usize {
            return Err(FrameError::AckHostTooLong(self.host.len()));
        }
        self.id.ser(buf);
        buf.put_u8(self.host.len() as u8);
        buf.put_slice(self.host.as_bytes());
        buf.put_u16(self.port);
        Ok(())
    }

    fn try_deser(buf: &mut impl Buf) -> Result<AckHeader, FrameError> {
        let id = AckId::try_deser(buf)?;
        let host_len = buf
            .try_get_u8()
            .map_err(|_| FrameError::Truncated("ack host length"))? as usize;
        if buf.remaining() < host_len {
            return Err(FrameError::Truncated("ack host"));
        }
        let mut raw_host = vec![0u8; host_len];
        buf.copy_to_slice(&mut raw_host);
        let host = String::from_utf8(raw_host).map_err(|_| FrameError::HostNotUtf8)?;
        let port = buf
            .try_get_u16()
            .map_err(|_| FrameError::Truncated("ack port"))?;
        Ok(AckHeader { id, host, port })
    }
}

/// One datagram's worth of application data plus the optional ack block.
#[derive(Clone, Eq, PartialEq)]
pub struct Frame {
    pub ack: Option<AckHeader>,
    pub payload: Bytes,
}
impl Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ack {
            Some(ack) => write!(f, "FRM{{{:?}:{}b}}", ack, self.payload.len()),
            None => write!(f, "FRM{{{}b}}", self.payload.len()),
        }
    }
}

impl Frame {
    pub fn new(ack: Option<AckHeader>, payload: Bytes) -> Frame {
        Frame { ack, payload }
    }

    /// Number of bytes [Frame::ser] will write, for sizing the send buffer.
    pub fn serialized_len(&self, length_check: bool) -> usize {
        let body = self.body_len();
        if length_check {
            size_of::<u32>() + body
        } else {
            body
        }
    }

    fn body_len(&self) -> usize {
        let ack_len = match &self.ack {
            Some(ack) => ack.serialized_len(),
            None => 0,
        };
        ack_len + self.payload.len()
    }

    pub fn ser(&self, length_check: bool, buf: &mut impl BufMut) -> Result<(), FrameError> {
        if length_check {
            let body_len = u32::try_from(self.body_len())
                .map_err(|_| FrameError::PayloadTooLong(self.payload.len()))?;
            buf.put_u32(body_len);
        }
        if let Some(ack) = &self.ack {
            ack.ser(buf)?;
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Decodes one datagram. `expect_ack` and `length_check` must match the sending side's
    ///  configuration - the frame itself does not say which parts are present.
    pub fn try_deser(
        buf: &mut impl Buf,
        expect_ack: bool,
        length_check: bool,
    ) -> Result<Frame, FrameError> {
        if length_check {
            let declared = buf
                .try_get_u32()
                .map_err(|_| FrameError::Truncated("length field"))? as usize;
            let actual = buf.remaining();
            if declared != actual {
                return Err(FrameError::LengthMismatch { declared, actual });
            }
        }

        let ack = if expect_ack {
            Some(AckHeader::try_deser(buf)?)
        } else {
            None
        };

        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(Frame { ack, payload })
    }
}
