//! Live-spikes wire protocol.
//!
//! Every datagram carries exactly one frame. All frames share an 8-byte
//! header followed by a length-prefixed label:
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬───────────────────────────────────┐
//! │ Type(1) │ Flags(1)│ Len(2)  │ Sequence (4)                      │
//! ├─────────┼─────────┴─────────┴───────────────────────────────────┤
//! │ LLen(1) │ Label (LLen bytes, UTF-8)                             │
//! └─────────┴───────────────────────────────────────────────────────┘
//! ```
//!
//! `Len` is the total frame length including the header. `Sequence` counts
//! frames per sender and lets the receiver log gaps. All integers are
//! little-endian.
//!
//! Frame types:
//! - 0x10 = START (device → adapter)
//! - 0x11 = STOP (device → adapter)
//! - 0x12 = CONTINUE (adapter → device)
//! - 0x13 = SPIKES (device → adapter): `Time(4, i32 ms) Count(2) Ids(4 × Count)`
//! - 0x14 = INJECT (adapter → device): `Count(2) Ids(4 × Count)`

use thiserror::Error;

use crate::queue::UnitId;

/// Frame type discriminants.
pub mod frame_type {
    pub const START: u8 = 0x10;
    pub const STOP: u8 = 0x11;
    pub const CONTINUE: u8 = 0x12;
    pub const SPIKES: u8 = 0x13;
    pub const INJECT: u8 = 0x14;
}

/// Size of the common header.
pub const HEADER_SIZE: usize = 8;

/// Longest label that fits the one-byte length prefix.
pub const MAX_LABEL_LEN: usize = u8::MAX as usize;

/// Largest frame the length field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveFrame {
    /// The device started running `label`.
    Start { label: String },
    /// The device paused or stopped `label`.
    Stop { label: String },
    /// The adapter finished a step and lets the device continue.
    Continue { label: String },
    /// Spikes emitted by the device at `time_ms`.
    Spikes {
        label: String,
        time_ms: i32,
        ids: Vec<UnitId>,
    },
    /// Spikes sent to the device.
    Inject { label: String, ids: Vec<UnitId> },
}

impl LiveFrame {
    /// Label the frame refers to.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Start { label }
            | Self::Stop { label }
            | Self::Continue { label }
            | Self::Spikes { label, .. }
            | Self::Inject { label, .. } => label,
        }
    }

    const fn type_byte(&self) -> u8 {
        match self {
            Self::Start { .. } => frame_type::START,
            Self::Stop { .. } => frame_type::STOP,
            Self::Continue { .. } => frame_type::CONTINUE,
            Self::Spikes { .. } => frame_type::SPIKES,
            Self::Inject { .. } => frame_type::INJECT,
        }
    }
}

/// Errors during encode/decode.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer too small to decode frame.
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },
    /// Unknown frame type.
    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),
    /// Frame length field doesn't match actual data.
    #[error("invalid frame length")]
    InvalidLength,
    /// Label is not UTF-8 or longer than [`MAX_LABEL_LEN`].
    #[error("invalid label")]
    InvalidLabel,
    /// The spike list does not fit one frame.
    #[error("too many spikes for one frame: {0}")]
    TooManySpikes(usize),
}

struct FrameWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> FrameWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write header and return position of length field for patching.
    fn write_header(&mut self, frame_type: u8, sequence: u32) -> usize {
        self.put_u8(frame_type);
        self.put_u8(0);
        let len_pos = self.buf.len();
        self.put_u16(0);
        self.put_u32(sequence);
        len_pos
    }

    fn put_label(&mut self, label: &str) -> Result<(), ProtocolError> {
        let len = u8::try_from(label.len()).map_err(|_| ProtocolError::InvalidLabel)?;
        self.put_u8(len);
        self.buf.extend_from_slice(label.as_bytes());
        Ok(())
    }

    fn put_ids(&mut self, ids: &[UnitId]) -> Result<(), ProtocolError> {
        let count = u16::try_from(ids.len()).map_err(|_| ProtocolError::TooManySpikes(ids.len()))?;
        self.put_u16(count);
        for id in ids {
            self.put_u32(id.get());
        }
        Ok(())
    }

    fn patch_length(&mut self, len_pos: usize) -> Result<(), ProtocolError> {
        let total = u16::try_from(self.buf.len()).map_err(|_| ProtocolError::InvalidLength)?;
        self.buf[len_pos..len_pos + 2].copy_from_slice(&total.to_le_bytes());
        Ok(())
    }
}

struct FrameReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> FrameReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        if self.remaining() < N {
            return Err(ProtocolError::BufferTooSmall {
                need: N,
                have: self.remaining(),
            });
        }
        let mut arr = [0u8; N];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(arr)
    }

    fn take_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>()?[0])
    }

    fn take_u16(&mut self) -> Result<u16, ProtocolError> {
        self.take().map(u16::from_le_bytes)
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        self.take().map(u32::from_le_bytes)
    }

    fn take_i32(&mut self) -> Result<i32, ProtocolError> {
        self.take().map(i32::from_le_bytes)
    }

    fn take_label(&mut self) -> Result<String, ProtocolError> {
        let len = usize::from(self.take_u8()?);
        if self.remaining() < len {
            return Err(ProtocolError::BufferTooSmall {
                need: len,
                have: self.remaining(),
            });
        }
        let bytes = &self.buf[self.cursor..self.cursor + len];
        self.cursor += len;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidLabel)
    }

    fn take_ids(&mut self) -> Result<Vec<UnitId>, ProtocolError> {
        let count = usize::from(self.take_u16()?);
        if self.remaining() != count * 4 {
            return Err(ProtocolError::InvalidLength);
        }
        (0..count).map(|_| self.take_u32().map(UnitId::new)).collect()
    }
}

/// Encodes a frame into `buf`.
///
/// The buffer is cleared and reused (preserves capacity).
///
/// # Errors
///
/// Fails if the label or the spike list does not fit the wire format.
pub fn encode_frame(frame: &LiveFrame, sequence: u32, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let mut w = FrameWriter::new(buf);
    let len_pos = w.write_header(frame.type_byte(), sequence);
    w.put_label(frame.label())?;
    match frame {
        LiveFrame::Start { .. } | LiveFrame::Stop { .. } | LiveFrame::Continue { .. } => {}
        LiveFrame::Spikes { time_ms, ids, .. } => {
            w.put_i32(*time_ms);
            w.put_ids(ids)?;
        }
        LiveFrame::Inject { ids, .. } => w.put_ids(ids)?,
    }
    w.patch_length(len_pos)
}

/// Decodes one frame, returning it with its sequence number.
///
/// # Errors
///
/// Fails on truncated, oversized or unknown frames.
pub fn decode_frame(bytes: &[u8]) -> Result<(LiveFrame, u32), ProtocolError> {
    let mut r = FrameReader::new(bytes);

    let frame_type = r.take_u8()?;
    let _flags = r.take_u8()?;
    let len = usize::from(r.take_u16()?);
    let sequence = r.take_u32()?;
    if len != bytes.len() {
        return Err(ProtocolError::InvalidLength);
    }

    let label = r.take_label()?;
    let frame = match frame_type {
        frame_type::START => LiveFrame::Start { label },
        frame_type::STOP => LiveFrame::Stop { label },
        frame_type::CONTINUE => LiveFrame::Continue { label },
        frame_type::SPIKES => {
            let time_ms = r.take_i32()?;
            let ids = r.take_ids()?;
            LiveFrame::Spikes {
                label,
                time_ms,
                ids,
            }
        }
        frame_type::INJECT => {
            let ids = r.take_ids()?;
            LiveFrame::Inject { label, ids }
        }
        other => return Err(ProtocolError::UnknownFrameType(other)),
    };
    if r.remaining() != 0 {
        return Err(ProtocolError::InvalidLength);
    }
    Ok((frame, sequence))
}
