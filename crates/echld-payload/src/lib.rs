//! Typed payloads for echld frames.
//!
//! A frame's payload is one of a handful of shapes built from two
//! primitives: 4-byte little-endian `i32` integers and NUL-terminated UTF-8
//! strings. [`Message`] gives every message type its typed form;
//! [`Message::encode`] and [`Message::decode`] are the only conversion points
//! between bytes and values.
//!
//! Decoding is strict and bounds-checked. It never reads past the payload and
//! never mutates it. Encoding refuses strings that could not survive the
//! trip, rather than truncating them.

pub mod errcode;
pub mod error;
pub mod message;
pub mod params;
pub mod wire;

pub use errcode::ErrorCode;
pub use error::{DecodeError, EncodeError, Result};
pub use message::Message;
pub use params::Params;
pub use wire::{PayloadReader, PayloadWriter};
