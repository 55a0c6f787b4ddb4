//! fedwire wire format — the chunk header and the tensor codec.
//!
//! These types ARE the protocol. Every field, every size, every reserved
//! byte is part of the wire format; both ends must agree on all of it.
//!
//! A chunk is a 28-byte header followed by `length` elements, everything
//! little-endian. The header is a #[repr(C)] struct built from alignment-1
//! little-endian integers with zerocopy derives, so it is read straight out
//! of a datagram buffer with no unsafe code.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::element::{DType, Element};
use crate::tensor::{OwnedTensor, Tensor};

// ── Chunk Header ─────────────────────────────────────────────────────────────

/// Precedes every tensor fragment on the wire.
///
/// Wire size: 28 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Element type of the payload. See [`DType`].
    pub dtype: u8,

    /// Reserved, must be zero.
    pub flags: U16<LittleEndian>,

    /// Position of this chunk within its fragmentation run. The reassembly key.
    pub sequence: U32<LittleEndian>,

    /// Number of payload elements following the header.
    pub length: U32<LittleEndian>,

    /// The sender's max_payload_elements for this run. Chunk `s` starts at
    /// element `s * stride` of the original tensor.
    pub stride: U32<LittleEndian>,

    /// Element count of the whole tensor this run fragments. Lets a
    /// receiver tell a lost final chunk from a shorter run.
    pub total: U32<LittleEndian>,

    /// Send time in microseconds on the sender's clock. Informational only;
    /// never used for ordering.
    pub timestamp_us: U64<LittleEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkHeader, [u8; 28]);

impl ChunkHeader {
    pub fn new(
        dtype: DType,
        sequence: u32,
        length: u32,
        stride: u32,
        total: u32,
        timestamp: Duration,
    ) -> Self {
        Self {
            version: CHUNK_VERSION,
            dtype: dtype.into(),
            flags: U16::new(0),
            sequence: U32::new(sequence),
            length: U32::new(length),
            stride: U32::new(stride),
            total: U32::new(total),
            timestamp_us: U64::new(timestamp.as_micros() as u64),
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.get()
    }

    pub fn length(&self) -> u32 {
        self.length.get()
    }

    pub fn stride(&self) -> u32 {
        self.stride.get()
    }

    pub fn total(&self) -> u32 {
        self.total.get()
    }

    /// Chunks in this run: `ceil(total / stride)`.
    pub fn chunk_count(&self) -> u32 {
        match self.stride() {
            0 => 0,
            stride => self.total().div_ceil(stride),
        }
    }

    pub fn timestamp(&self) -> Duration {
        Duration::from_micros(self.timestamp_us.get())
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current chunk format version.
pub const CHUNK_VERSION: u8 = 0x01;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = std::mem::size_of::<ChunkHeader>();

/// Largest chunk a single UDP datagram can carry (IPv4 payload limit).
pub const MAX_DATAGRAM: usize = 65_507;

/// Most elements of `dtype` that fit in one chunk.
pub const fn max_chunk_elements(dtype: DType) -> usize {
    (MAX_DATAGRAM - HEADER_LEN) / dtype.width()
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// A decoded chunk. The tensor owns its elements: they are copied out of
/// the transport buffer, which is typically reused for the next datagram
/// and carries no alignment guarantee for the payload.
#[derive(Debug, Clone)]
pub struct Decoded<T: Element> {
    pub header: ChunkHeader,
    pub tensor: OwnedTensor<T>,
}

/// Serialize one tensor fragment into a transport-ready chunk.
pub fn encode<T: Element>(
    tensor: &Tensor<'_, T>,
    sequence: u32,
    stride: u32,
    total: u32,
    timestamp: Duration,
) -> Result<Bytes, WireError> {
    encode_slice(tensor.data(), sequence, stride, total, timestamp)
}

/// `encode` over a plain slice, for senders that fragment a buffer they
/// only hold by shared reference.
pub fn encode_slice<T: Element>(
    elements: &[T],
    sequence: u32,
    stride: u32,
    total: u32,
    timestamp: Duration,
) -> Result<Bytes, WireError> {
    let bytes = HEADER_LEN + elements.len() * T::DTYPE.width();
    if bytes > MAX_DATAGRAM {
        return Err(WireError::PayloadTooLarge(bytes));
    }
    let length = elements.len() as u32;
    check_run(sequence, length, stride, total)?;

    let header = ChunkHeader::new(T::DTYPE, sequence, length, stride, total, timestamp);

    let mut buf = BytesMut::with_capacity(bytes);
    buf.put_slice(header.as_bytes());
    for &x in elements {
        x.put_le(&mut buf);
    }
    Ok(buf.freeze())
}

/// Parse and validate a chunk. Nothing is returned unless the whole chunk
/// is well formed.
pub fn decode<T: Element>(bytes: &[u8]) -> Result<Decoded<T>, WireError> {
    let header = ChunkHeader::read_from_prefix(bytes).ok_or(WireError::Truncated {
        required: HEADER_LEN,
        actual: bytes.len(),
    })?;

    if header.version != CHUNK_VERSION {
        return Err(WireError::UnknownVersion(header.version));
    }
    let flags = header.flags.get();
    if flags != 0 {
        return Err(WireError::ReservedFlagsSet(flags));
    }
    let dtype = DType::try_from(header.dtype)?;
    if dtype != T::DTYPE {
        return Err(WireError::DTypeMismatch {
            expected: T::DTYPE,
            actual: dtype,
        });
    }

    let length = header.length();
    check_run(header.sequence(), length, header.stride(), header.total())?;

    let mut payload = &bytes[HEADER_LEN..];
    let expected = length as usize * dtype.width();
    if payload.len() != expected {
        return Err(WireError::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }

    let elements: Vec<T> = (0..length).map(|_| T::get_le(&mut payload)).collect();
    Ok(Decoded {
        header,
        tensor: Tensor::from_vec(elements),
    })
}

/// A chunk must sit inside its run, and every chunk but the last carries a
/// full stride.
fn check_run(sequence: u32, length: u32, stride: u32, total: u32) -> Result<(), WireError> {
    if stride == 0 {
        return Err(WireError::ZeroStride);
    }
    if length > stride {
        return Err(WireError::LengthExceedsStride { length, stride });
    }
    let start = u64::from(sequence) * u64::from(stride);
    if start >= u64::from(total) {
        return Err(WireError::OutsideRun {
            sequence,
            stride,
            total,
        });
    }
    let expected = (u64::from(total) - start).min(u64::from(stride)) as u32;
    if length != expected {
        return Err(WireError::UnexpectedLength {
            sequence,
            length,
            expected,
        });
    }
    Ok(())
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("chunk too short: need at least {required} bytes, got {actual}")]
    Truncated { required: usize, actual: usize },

    #[error("unknown chunk version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown dtype byte: 0x{0:02x}")]
    UnknownDType(u8),

    #[error("dtype mismatch: expected {expected:?}, got {actual:?}")]
    DTypeMismatch { expected: DType, actual: DType },

    #[error("reserved flags are non-zero: 0x{0:04x}")]
    ReservedFlagsSet(u16),

    #[error("chunk stride is zero")]
    ZeroStride,

    #[error("chunk length {length} exceeds stride {stride}")]
    LengthExceedsStride { length: u32, stride: u32 },

    #[error("chunk {sequence} with stride {stride} lies outside a run of {total} elements")]
    OutsideRun { sequence: u32, stride: u32, total: u32 },

    #[error("chunk {sequence} carries {length} elements, its run position needs {expected}")]
    UnexpectedLength {
        sequence: u32,
        length: u32,
        expected: u32,
    },

    #[error("payload length mismatch: header says {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("chunk of {0} bytes exceeds maximum datagram {}", MAX_DATAGRAM)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
