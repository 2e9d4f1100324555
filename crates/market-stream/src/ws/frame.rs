/*
[INPUT]:  Frames to send, or a byte stream carrying RFC 6455 frames
[OUTPUT]: Wire bytes (masked for client frames), decoded Frame values
[POS]:    WebSocket layer - single-frame codec, transport-agnostic
[UPDATE]: When changing length limits, masking rules, or supported opcodes
*/

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted from the wire.
pub const MAX_PAYLOAD_LEN: u64 = 16 * 1024 * 1024;

const MAX_CONTROL_PAYLOAD_LEN: usize = 125;
const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// Which side of the connection is reading.
///
/// A client must only ever see unmasked frames; a server must only see masked ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub fin: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            fin: true,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Close frame carrying status 1000 (normal closure).
    pub fn close() -> Self {
        Self::close_with(CLOSE_NORMAL, "")
    }

    /// Reason is cut to fit a control frame, never inside a UTF-8 sequence.
    pub fn close_with(code: u16, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_CONTROL_PAYLOAD_LEN - 2);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut payload = Vec::with_capacity(2 + end);
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(&reason.as_bytes()[..end]);
        Self::new(Opcode::Close, payload)
    }

    /// Status code of a Close frame, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }
}

#[derive(Error, Debug)]
pub enum FrameError {
    /// Stream ended, cleanly or mid-frame.
    #[error("connection closed by peer")]
    Eof,

    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),

    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("server frame is masked")]
    MaskedServerFrame,

    #[error("client frame is not masked")]
    UnmaskedClientFrame,

    #[error("payload length is not minimally encoded")]
    NonMinimalLength,

    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u64),

    #[error("invalid control frame: {0}")]
    InvalidControlFrame(&'static str),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl FrameError {
    /// EOF and transport errors are disconnects, everything else is a protocol violation.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Eof | FrameError::Io(_))
    }
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Eof
        } else {
            FrameError::Io(err)
        }
    }
}

/// XOR `buf` in place with the repeating 4-byte `mask`.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Encode a frame, masking it with a fresh random key when `mask` is set.
pub fn encode(frame: &Frame, mask: bool) -> Vec<u8> {
    let key = mask.then(rand::random::<[u8; 4]>);
    encode_with_mask(frame, key)
}

pub fn encode_with_mask(frame: &Frame, mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = frame.payload.len();
    let mut out = Vec::with_capacity(len + 14);

    let fin_bit = if frame.fin { 0x80 } else { 0x00 };
    out.push(fin_bit | frame.opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(&frame.payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(&frame.payload),
    }

    out
}

/// Read exactly one frame from `reader`.
pub async fn decode<R>(reader: &mut R, role: Role) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = header[0] & 0x80 != 0;
    if header[0] & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let raw_opcode = header[0] & 0x0F;
    let opcode = Opcode::from_u8(raw_opcode).ok_or(FrameError::InvalidOpcode(raw_opcode))?;

    let masked = header[1] & 0x80 != 0;
    match (role, masked) {
        (Role::Client, true) => return Err(FrameError::MaskedServerFrame),
        (Role::Server, false) => return Err(FrameError::UnmaskedClientFrame),
        _ => {}
    }

    let len = match header[1] & 0x7F {
        126 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf).await?;
            let len = u16::from_be_bytes(buf) as u64;
            if len < 126 {
                return Err(FrameError::NonMinimalLength);
            }
            len
        }
        127 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf).await?;
            let len = u64::from_be_bytes(buf);
            if len <= u16::MAX as u64 || len >> 63 != 0 {
                return Err(FrameError::NonMinimalLength);
            }
            len
        }
        short => short as u64,
    };

    if opcode.is_control() {
        if len > MAX_CONTROL_PAYLOAD_LEN as u64 {
            return Err(FrameError::InvalidControlFrame("payload longer than 125 bytes"));
        }
        if !fin {
            return Err(FrameError::InvalidControlFrame("fragmented control frame"));
        }
    }
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(len));
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        opcode,
        fin,
        payload,
    })
}

/// Encode `frame` as a masked client frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(frame, true)).await?;
    writer.flush().await
}
