//! MsgPack codec using `rmp-serde` and `rmpv`.
//!
//! **Use `to_vec_named` for typed values.** The editor decodes dictionary
//! arguments (UI options, client info, highlight definitions) as msgpack maps.
//! `to_vec` would serialize structs as positional arrays and the remote call
//! would fail with a type error.
//!
//! # Example
//!
//! ```
//! use nvim_rpc::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct UiOptions {
//!     rgb: bool,
//!     ext_linegrid: bool,
//! }
//!
//! let opts = UiOptions { rgb: true, ext_linegrid: false };
//! let value = MsgPackCodec::to_value(&opts).unwrap();
//! assert!(value.is_map());
//!
//! let decoded: UiOptions = MsgPackCodec::from_value(&value).unwrap();
//! assert_eq!(decoded, opts);
//! ```

use rmpv::Value;

use crate::error::{Result, RpcError};

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a serde value to MsgPack bytes (struct-as-map format).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, NOT to_vec
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a serde value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Convert a serde value into a wire [`Value`].
    pub fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
        let bytes = Self::encode(value)?;
        Self::decode_value(&bytes)
    }

    /// Convert a wire [`Value`] into a serde value.
    pub fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
        let bytes = Self::encode_value(value)?;
        Self::decode(&bytes)
    }

    /// Write a single [`Value`] to bytes.
    pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        rmpv::encode::write_value(&mut buf, value).map_err(|e| RpcError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Read a single [`Value`] from the start of `bytes`.
    ///
    /// Trailing bytes after the first value are ignored.
    pub fn decode_value(bytes: &[u8]) -> Result<Value> {
        let mut rd = bytes;
        Ok(rmpv::decode::read_value(&mut rd)?)
    }
}
