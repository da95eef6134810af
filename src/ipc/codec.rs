//! Line framing for the daemon socket.
//!
//! The slipway daemon speaks one JSON document per `\n` terminated line in
//! both directions. [`IpcCodec`] wraps [`tokio_util::codec::LinesCodec`]
//! and caps the inbound line length, so a daemon that never sends a newline
//! cannot make the client buffer without bound.
//!
//! # Usage
//!
//! The client reads responses through a
//! [`tokio_util::codec::FramedRead`] over the socket's receive half and
//! encodes each request into a [`BytesMut`] before writing it whole, so a
//! request line is never interleaved with another one.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum inbound line length: 1 MiB.
///
/// A longer response line makes [`IpcCodec::decode`] fail with
/// [`AppError::Protocol`]. The oversized line is discarded up to its
/// newline and decoding resumes with the next one.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited JSON codec for the daemon socket.
///
/// Each complete UTF-8 line is one request or response. The JSON itself is
/// parsed by the caller; this type only frames it.
///
/// # Decoder
///
/// Yields one `String` per line with the terminator stripped (a trailing
/// `\r` is removed too). Lines longer than [`MAX_LINE_BYTES`] fail with
/// [`AppError::Protocol`] and I/O failures map to [`AppError::Transport`],
/// which the client treats as a lost connection.
///
/// # Encoder
///
/// Writes `item` followed by `\n`. The length cap applies to inbound lines
/// only.
///
/// # Examples
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use webpier_bridge::ipc::codec::IpcCodec;
///
/// let responses = FramedRead::new(recv_half, IpcCodec::new());
/// ```
#[derive(Debug)]
pub struct IpcCodec(LinesCodec);

impl IpcCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IpcCodec {
    type Item = String;
    type Error = AppError;

    /// Next complete line in `src`.
    ///
    /// `Ok(None)` means no newline has arrived yet and more bytes are
    /// needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Like [`IpcCodec::decode`], but once the stream has ended an
    /// unterminated final line is returned as-is.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for IpcCodec {
    type Error = AppError;

    /// Append `item` and a `\n` terminator to `dst`.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Translate [`LinesCodecError`] into the crate's error kinds.
fn map_codec_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}
