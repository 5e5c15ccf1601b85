//! Protocol module - message model and framing.
//!
//! This module implements the msgpack-RPC wire format:
//! - Request / Response / Notification tuples
//! - Frame buffer for accumulating partial reads

mod frame_buffer;
mod message;

pub use frame_buffer::{Decoded, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
pub use message::{kind, DecodeError, Message, Notification, Request, Response};
