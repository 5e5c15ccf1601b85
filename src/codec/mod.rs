//! Codec module - msgpack conversion between typed data and wire values.
//!
//! Every frame field that carries user data (`params`, `result`, `error`) is an
//! opaque [`rmpv::Value`]. [`MsgPackCodec`] converts between those values, raw
//! bytes and serde types.
//!
//! # Example
//!
//! ```
//! use nvim_rpc::codec::MsgPackCodec;
//! use rmpv::Value;
//!
//! let value = MsgPackCodec::to_value(&vec![1, 2, 3]).unwrap();
//! assert_eq!(value, Value::Array(vec![1.into(), 2.into(), 3.into()]));
//!
//! let back: Vec<i32> = MsgPackCodec::from_value(&value).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
