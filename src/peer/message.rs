use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Messages exchanged between peers.
///
/// Frame layout, all integers big-endian:
/// - `Request`:  `[0x01][index: u32]`
/// - `Piece`:    `[0x02][index: u32][len: u32][payload; len]`
/// - `NotFound`: `[0x03][index: u32][len: u32 = 0]`
///
/// The tag byte doubles as the protocol version: a new revision of the
/// framing must claim new tags rather than reinterpret existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Ask for the full content of a piece
    Request { piece_index: u32 },
    /// Verified content of a piece
    Piece { piece_index: u32, data: Bytes },
    /// The responder does not hold this piece
    NotFound { piece_index: u32 },
}

impl PeerMessage {
    /// Message type tags
    pub const REQUEST: u8 = 0x01;
    pub const PIECE: u8 = 0x02;
    pub const NOT_FOUND: u8 = 0x03;

    /// tag + index
    const REQUEST_LEN: usize = 5;
    /// tag + index + length
    const RESPONSE_HEADER_LEN: usize = 9;

    pub fn piece_index(&self) -> u32 {
        match self {
            PeerMessage::Request { piece_index }
            | PeerMessage::Piece { piece_index, .. }
            | PeerMessage::NotFound { piece_index } => *piece_index,
        }
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Append the encoded frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            PeerMessage::Request { piece_index } => {
                buf.reserve(Self::REQUEST_LEN);
                buf.put_u8(Self::REQUEST);
                buf.put_u32(*piece_index);
            }
            PeerMessage::Piece { piece_index, data } => {
                buf.reserve(Self::RESPONSE_HEADER_LEN + data.len());
                buf.put_u8(Self::PIECE);
                buf.put_u32(*piece_index);
                buf.put_u32(data.len() as u32);
                buf.put_slice(data);
            }
            PeerMessage::NotFound { piece_index } => {
                buf.reserve(Self::RESPONSE_HEADER_LEN);
                buf.put_u8(Self::NOT_FOUND);
                buf.put_u32(*piece_index);
                buf.put_u32(0);
            }
        }
    }

    /// Try to take one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
    /// incomplete. Bytes past the frame boundary are never consumed, so
    /// pipelined frames stay in the buffer for the next call. A declared
    /// payload above `max_payload` is rejected before any space is reserved.
    pub fn decode(buf: &mut BytesMut, max_payload: u32) -> Result<Option<Self>, ProtocolError> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        match tag {
            Self::REQUEST => {
                if buf.len() < Self::REQUEST_LEN {
                    return Ok(None);
                }
                buf.advance(1);
                let piece_index = buf.get_u32();
                Ok(Some(PeerMessage::Request { piece_index }))
            }
            Self::PIECE | Self::NOT_FOUND => {
                if buf.len() < Self::RESPONSE_HEADER_LEN {
                    return Ok(None);
                }

                let declared = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
                let max = if tag == Self::NOT_FOUND { 0 } else { max_payload };
                if declared > max {
                    return Err(ProtocolError::MalformedLength { declared, max });
                }

                let frame_len = Self::RESPONSE_HEADER_LEN + declared as usize;
                if buf.len() < frame_len {
                    buf.reserve(frame_len - buf.len());
                    return Ok(None);
                }

                buf.advance(1);
                let piece_index = buf.get_u32();
                let length = buf.get_u32() as usize;

                if tag == Self::NOT_FOUND {
                    Ok(Some(PeerMessage::NotFound { piece_index }))
                } else {
                    let data = buf.split_to(length).freeze();
                    Ok(Some(PeerMessage::Piece { piece_index, data }))
                }
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}
