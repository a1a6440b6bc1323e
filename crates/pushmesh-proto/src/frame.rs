//! Wire framing: 2-byte big-endian length prefix, then payload.
//!
//! This is the same framing used by every component (gateway, msgserver,
//! manager) — a single [`tokio_util::codec::LengthDelimitedCodec`]
//! configuration shared via [`codec`].

use tokio::net::TcpStream;
use tokio_util::codec::{Framed as TokioFramed, LengthDelimitedCodec};

/// Maximum payload size in bytes (matches the 16-bit length prefix).
pub const MAX_FRAME_LEN: usize = 65_535;

/// A framed TCP stream: `Stream<Item = Result<BytesMut>>` + `Sink<Bytes>`.
pub type Framed = TokioFramed<TcpStream, LengthDelimitedCodec>;

/// Build the length-delimited codec used for every pushmesh socket.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Wrap a connected or accepted socket in the shared frame codec.
pub fn framed(stream: TcpStream) -> Framed {
    TokioFramed::new(stream, codec())
}
