//! Opus codec wrapper
//!
//! Encoding and decoding sit behind [`AudioEncoder`] / [`AudioDecoder`] so the
//! pipeline can be driven by other codecs (or test doubles).

pub mod concealment;
pub mod decoder;
pub mod encoder;

pub use concealment::{ConcealmentPolicy, Concealer};
pub use decoder::{AudioDecoder, OpusDecoder};
pub use encoder::{AudioEncoder, OpusEncoder};
