//! msgpack-RPC message model.
//!
//! Every frame is a single msgpack array whose first element is the type
//! discriminator:
//!
//! ```text
//! Request      [0, id, method, params]
//! Response     [1, id, error,  result]
//! Notification [2, method, params]
//! ```
//!
//! `params` is always an array. `error` is nil on success.
//!
//! # Example
//!
//! ```
//! use nvim_rpc::protocol::{Message, Request};
//! use rmpv::Value;
//!
//! let msg = Message::Request(Request::new(1, "nvim_get_current_line", vec![]));
//! let value = msg.to_value();
//! assert_eq!(Message::from_value(value).unwrap(), msg);
//! ```

use bytes::Bytes;
use rmpv::Value;
use thiserror::Error;

use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Message type discriminators.
pub mod kind {
    /// `[0, id, method, params]`
    pub const REQUEST: u64 = 0;
    /// `[1, id, error, result]`
    pub const RESPONSE: u64 = 1;
    /// `[2, method, params]`
    pub const NOTIFICATION: u64 = 2;
}

/// A single frame could not be interpreted as a message.
///
/// Never fatal for the stream: the frame is dropped and reading continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Top-level value is not an array.
    #[error("frame is not an array: {0}")]
    NotAnArray(Value),

    /// Discriminator missing or not an integer.
    #[error("frame has no integer type discriminator")]
    MissingType,

    /// Discriminator outside 0..=2.
    #[error("unknown message type {0}")]
    UnknownType(u64),

    /// Wrong number of elements for the discriminated type.
    #[error("message type {kind} expects {expected} elements, got {actual}")]
    WrongArity {
        /// Discriminator.
        kind: u64,
        /// Required element count.
        expected: usize,
        /// Element count found.
        actual: usize,
    },

    /// A field has the wrong type.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
}

/// A call issued by one side that expects exactly one [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id, unique among pending calls of the sender.
    pub id: u32,
    /// Remote method name.
    pub method: String,
    /// Positional arguments.
    pub params: Vec<Value>,
}

impl Request {
    /// Create a new request.
    pub fn new(id: u32, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Decode the positional arguments into `T` (usually a tuple).
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::from_value(&Value::Array(self.params.clone()))
    }
}

/// Answer to a [`Request`] with the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered.
    pub id: u32,
    /// Peer-supplied error, `None` on success.
    pub error: Option<Value>,
    /// Call result, `Nil` when the call returns nothing or failed.
    pub result: Value,
}

impl Response {
    /// Successful response.
    pub fn success(id: u32, result: Value) -> Self {
        Self {
            id,
            error: None,
            result,
        }
    }

    /// Failed response.
    pub fn failure(id: u32, error: Value) -> Self {
        Self {
            id,
            error: Some(error),
            result: Value::Nil,
        }
    }

    /// Whether the response carries an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Fire-and-forget message, no id and no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Event or method name.
    pub method: String,
    /// Positional arguments.
    pub params: Vec<Value>,
}

impl Notification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Decode the positional arguments into `T` (usually a tuple).
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::from_value(&Value::Array(self.params.clone()))
    }
}

/// Any of the three frame kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `[0, id, method, params]`
    Request(Request),
    /// `[1, id, error, result]`
    Response(Response),
    /// `[2, method, params]`
    Notification(Notification),
}

impl Message {
    /// The wire discriminator of this message.
    pub fn kind(&self) -> u64 {
        match self {
            Message::Request(_) => kind::REQUEST,
            Message::Response(_) => kind::RESPONSE,
            Message::Notification(_) => kind::NOTIFICATION,
        }
    }

    /// Build the wire tuple.
    pub fn to_value(&self) -> Value {
        match self {
            Message::Request(r) => Value::Array(vec![
                Value::from(kind::REQUEST),
                Value::from(r.id),
                Value::from(r.method.as_str()),
                Value::Array(r.params.clone()),
            ]),
            Message::Response(r) => Value::Array(vec![
                Value::from(kind::RESPONSE),
                Value::from(r.id),
                r.error.clone().unwrap_or(Value::Nil),
                r.result.clone(),
            ]),
            Message::Notification(n) => Value::Array(vec![
                Value::from(kind::NOTIFICATION),
                Value::from(n.method.as_str()),
                Value::Array(n.params.clone()),
            ]),
        }
    }

    /// Interpret a decoded msgpack value as a message.
    pub fn from_value(value: Value) -> std::result::Result<Self, DecodeError> {
        let mut fields = match value {
            Value::Array(fields) => fields,
            other => return Err(DecodeError::NotAnArray(other)),
        };

        let ty = fields
            .first()
            .and_then(Value::as_u64)
            .ok_or(DecodeError::MissingType)?;

        let expected = match ty {
            kind::REQUEST | kind::RESPONSE => 4,
            kind::NOTIFICATION => 3,
            other => return Err(DecodeError::UnknownType(other)),
        };
        if fields.len() != expected {
            return Err(DecodeError::WrongArity {
                kind: ty,
                expected,
                actual: fields.len(),
            });
        }

        match ty {
            kind::REQUEST => {
                let params = take_params(&mut fields[3])?;
                let method = take_method(&mut fields[2])?;
                let id = take_id(&fields[1])?;
                Ok(Message::Request(Request { id, method, params }))
            }
            kind::RESPONSE => {
                let result = std::mem::replace(&mut fields[3], Value::Nil);
                let error = match std::mem::replace(&mut fields[2], Value::Nil) {
                    Value::Nil => None,
                    error => Some(error),
                };
                let id = take_id(&fields[1])?;
                Ok(Message::Response(Response { id, error, result }))
            }
            _ => {
                let params = take_params(&mut fields[2])?;
                let method = take_method(&mut fields[1])?;
                Ok(Message::Notification(Notification { method, params }))
            }
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(MsgPackCodec::encode_value(&self.to_value())?))
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

fn take_id(value: &Value) -> std::result::Result<u32, DecodeError> {
    value
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| DecodeError::InvalidField {
            field: "id",
            reason: format!("expected u32, got {}", value),
        })
}

fn take_method(value: &mut Value) -> std::result::Result<String, DecodeError> {
    match std::mem::replace(value, Value::Nil) {
        Value::String(s) => s.into_str().ok_or_else(|| DecodeError::InvalidField {
            field: "method",
            reason: "method name is not valid UTF-8".to_string(),
        }),
        // Some peers send method names as binary.
        Value::Binary(b) => String::from_utf8(b).map_err(|_| DecodeError::InvalidField {
            field: "method",
            reason: "method name is not valid UTF-8".to_string(),
        }),
        other => Err(DecodeError::InvalidField {
            field: "method",
            reason: format!("expected string, got {}", other),
        }),
    }
}

fn take_params(value: &mut Value) -> std::result::Result<Vec<Value>, DecodeError> {
    match std::mem::replace(value, Value::Nil) {
        Value::Array(params) => Ok(params),
        other => Err(DecodeError::InvalidField {
            field: "params",
            reason: format!("expected array, got {}", other),
        }),
    }
}
