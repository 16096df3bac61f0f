//! HPACK header compression (RFC 7541).
//!
//! Tables are per-connection and per-direction: the decoder owns the
//! table driven by the peer's encoder, the encoder owns the table the
//! peer's decoder mirrors. Neither is ever shared across connections.

mod decoder;
mod encoder;
mod huffman;
mod table;

pub use self::decoder::{Decoder, DecoderError};
pub use self::encoder::Encoder;
pub use self::table::{DynamicTable, STATIC_TABLE};
