// ABOUTME: ASTM E1381 frame codec — STX/ETX/ETB framing, checksum, incremental decode
// ABOUTME: Pure byte-buffer functions; no I/O, no knowledge of transport phase or frame sequencing

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Start of Text — opens a frame.
pub const STX: u8 = 0x02;
/// End of Text — closes the terminal frame of a record.
pub const ETX: u8 = 0x03;
/// End of Transmission — ends a session/transfer.
pub const EOT: u8 = 0x04;
/// Enquiry — requests to begin a transfer.
pub const ENQ: u8 = 0x05;
/// Acknowledge.
pub const ACK: u8 = 0x06;
/// Negative acknowledge.
pub const NAK: u8 = 0x15;
/// End of Transmission Block — closes an intermediate (continued) frame.
pub const ETB: u8 = 0x17;
pub const CR: u8 = 0x0D;
pub const LF: u8 = 0x0A;

/// Maximum data bytes carried by a single encoded frame. Longer payloads are
/// split across ETB-continued frames by [`encode_message`].
pub const MAX_FRAME_DATA_LEN: usize = 240;

/// Upper bound on how many bytes of garbage [`decode_frame`] will scan through
/// looking for a frame terminator before giving up and reporting
/// [`Unterminated`](DecodeOutcome::Unterminated). Guards against an unbounded
/// read buffer when a peer never sends ETX/ETB.
pub const MAX_SCAN_LEN: usize = 2048;

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete, checksum-valid frame.
    Frame {
        fn_: u8,
        data: Bytes,
        /// `true` if this was the terminal (ETX) frame of a record, `false`
        /// if intermediate (ETB, more frames follow for this record).
        terminal: bool,
    },
    /// Not enough bytes buffered yet; call again once more data arrives.
    /// Zero bytes were consumed.
    NeedMore,
    /// The checksum did not match the recomputed value.
    BadChecksum,
    /// The byte layout did not match the frame grammar (missing STX, missing
    /// terminator, missing/invalid CRLF, non-hex checksum digits).
    BadFraming,
    /// The frame-number byte was present but not an ASCII digit `'0'..='7'`.
    BadFrameNumber,
    /// Scanned [`MAX_SCAN_LEN`] bytes past STX without finding ETX/ETB —
    /// corresponds to [`CodecError::Unterminated`].
    Unterminated,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("data exceeds maximum frame size and no terminator was found")]
    Unterminated,
}

/// Decode one frame from the front of `buf`.
///
/// Returns the outcome and the number of bytes consumed from `buf`. On
/// `NeedMore` zero bytes are consumed — callers should read more bytes and
/// try again. On every other outcome, including errors, a non-zero number of
/// bytes is consumed so the caller always makes forward progress, per the
/// codec's "never emits a frame it did not verify, but never gets stuck"
/// invariant.
pub fn decode_frame(buf: &[u8]) -> (DecodeOutcome, usize) {
    if buf.is_empty() {
        return (DecodeOutcome::NeedMore, 0);
    }
    if buf[0] != STX {
        return (DecodeOutcome::BadFraming, 1);
    }

    // Locate the frame terminator (ETX or ETB) after STX and FN.
    let scan_limit = buf.len().min(MAX_SCAN_LEN);
    let term_pos = buf[..scan_limit]
        .iter()
        .enumerate()
        .skip(2)
        .find(|(_, &b)| b == ETX || b == ETB)
        .map(|(i, _)| i);

    let term_pos = match term_pos {
        Some(pos) => pos,
        None if buf.len() >= MAX_SCAN_LEN => {
            return (DecodeOutcome::Unterminated, MAX_SCAN_LEN);
        }
        None => return (DecodeOutcome::NeedMore, 0),
    };

    // Need: term byte + 2 checksum hex digits + CR + LF.
    let frame_len = term_pos + 1 + 2 + 2;
    if buf.len() < frame_len {
        return (DecodeOutcome::NeedMore, 0);
    }

    let fn_byte = buf[1];
    if !fn_byte.is_ascii_digit() || !(b'0'..=b'7').contains(&fn_byte) {
        return (DecodeOutcome::BadFrameNumber, frame_len);
    }

    let terminal = buf[term_pos] == ETX;
    let c1 = buf[term_pos + 1];
    let c2 = buf[term_pos + 2];
    let cr = buf[term_pos + 3];
    let lf = buf[term_pos + 4];

    if cr != CR || lf != LF {
        return (DecodeOutcome::BadFraming, frame_len);
    }

    let checksum_byte = match hex_pair_to_byte(c1, c2) {
        Some(b) => b,
        None => return (DecodeOutcome::BadFraming, frame_len),
    };

    let computed = checksum(&buf[1..=term_pos]);
    if computed != checksum_byte {
        return (DecodeOutcome::BadChecksum, frame_len);
    }

    let data = Bytes::copy_from_slice(&buf[2..term_pos]);
    (
        DecodeOutcome::Frame {
            fn_: fn_byte - b'0',
            data,
            terminal,
        },
        frame_len,
    )
}

/// Encode `data` as one or more frames starting at frame number `start_fn`
/// (mod 8), splitting on [`MAX_FRAME_DATA_LEN`] boundaries. All but the last
/// chunk are ETB-terminated (intermediate); the last is ETX-terminated
/// (terminal). Returns the encoded frames in order along with the next frame
/// number to use.
pub fn encode_message(start_fn: u8, data: &[u8]) -> (Vec<Bytes>, u8) {
    if data.is_empty() {
        return (vec![encode_frame(start_fn, data, true)], next_fn(start_fn));
    }

    let mut frames = Vec::new();
    let mut fn_ = start_fn;
    let chunks: Vec<&[u8]> = data.chunks(MAX_FRAME_DATA_LEN).collect();
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.into_iter().enumerate() {
        frames.push(encode_frame(fn_, chunk, i == last));
        fn_ = next_fn(fn_);
    }
    (frames, fn_)
}

/// Encode a single frame: `STX FN data (ETX|ETB) C1 C2 CR LF`.
pub fn encode_frame(fn_: u8, data: &[u8], terminal: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() + 8);
    buf.put_u8(STX);
    buf.put_u8(b'0' + (fn_ % 8));
    buf.put_slice(data);
    let term = if terminal { ETX } else { ETB };
    buf.put_u8(term);

    // Checksum covers FN..=terminator, i.e. everything written since STX.
    let sum_region = &buf[1..];
    let c = checksum(sum_region);
    let hex = format!("{:02X}", c);
    buf.put_slice(hex.as_bytes());
    buf.put_u8(CR);
    buf.put_u8(LF);
    buf.freeze()
}

/// Sum of all bytes mod 256, the ASTM checksum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn next_fn(fn_: u8) -> u8 {
    (fn_ + 1) % 8
}

fn hex_pair_to_byte(c1: u8, c2: u8) -> Option<u8> {
    let hi = (c1 as char).to_digit(16)?;
    let lo = (c2 as char).to_digit(16)?;
    // Only accept uppercase hex, per spec's "two-hex-uppercase checksum".
    if c1.is_ascii_lowercase() || c2.is_ascii_lowercase() {
        return None;
    }
    Some((hi * 16 + lo) as u8)
}
