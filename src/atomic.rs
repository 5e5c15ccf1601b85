//! Batched calls executed by the peer in one step.
//!
//! [`AtomicCallBuilder`] queues `(method, params)` pairs and sends them as a
//! single `nvim_call_atomic` request whose only parameter is
//! `[[method, [params...]], ...]`.
//!
//! The peer runs the calls in order and stops at the first failure. Its
//! result is `[results, error]`:
//!
//! ```text
//! [[r0, r1, r2], nil]                       all succeeded
//! [[r0], [1, error_type, "message"]]        call 1 failed, r0 kept
//! ```
//!
//! # Example
//!
//! ```ignore
//! let outcome = AtomicCallBuilder::new()
//!     .add("nvim_get_current_line", vec![])
//!     .add("nvim_get_mode", vec![])
//!     .send(client.rpc())
//!     .await?;
//!
//! if let Some(failure) = &outcome.failure {
//!     tracing::warn!("call {} failed: {}", failure.index, failure.error);
//! }
//! ```

use rmpv::Value;

use crate::api;
use crate::error::{Result, RpcError};
use crate::rpc::RpcClient;

/// The failing call of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicFailure {
    /// Index of the failing call within the batch.
    pub index: usize,
    /// Error reported for it, `[error_type, message]`.
    pub error: Value,
}

/// Outcome of a batch: results of the calls that ran, plus the failure point
/// if one of them failed.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicOutcome {
    /// Results in call order, up to (not including) the failing call.
    pub results: Vec<Value>,
    /// `None` when every call succeeded.
    pub failure: Option<AtomicFailure>,
}

impl AtomicOutcome {
    /// Interpret the peer's `[results, error]` reply.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut parts = match value {
            Value::Array(parts) if parts.len() == 2 => parts,
            other => {
                return Err(RpcError::Protocol(format!(
                    "atomic result must be [results, error], got {}",
                    other
                )))
            }
        };

        let error = parts.pop().unwrap_or(Value::Nil);
        let results = match parts.pop() {
            Some(Value::Array(results)) => results,
            Some(other) => {
                return Err(RpcError::Protocol(format!(
                    "atomic results must be an array, got {}",
                    other
                )))
            }
            None => Vec::new(),
        };

        let failure = match error {
            Value::Nil => None,
            Value::Array(mut fields) if !fields.is_empty() => {
                let index = fields[0]
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| {
                        RpcError::Protocol(format!("atomic error index is not an integer: {}", fields[0]))
                    })?;
                fields.remove(0);
                Some(AtomicFailure {
                    index,
                    error: Value::Array(fields),
                })
            }
            other => {
                return Err(RpcError::Protocol(format!(
                    "atomic error must be nil or [index, type, message], got {}",
                    other
                )))
            }
        };

        Ok(Self { results, failure })
    }

    /// Whether every call succeeded.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Index of the failing call, if any.
    pub fn error_index(&self) -> Option<usize> {
        self.failure.as_ref().map(|f| f.index)
    }

    /// Error of the failing call, if any.
    pub fn error(&self) -> Option<&Value> {
        self.failure.as_ref().map(|f| &f.error)
    }

    /// All results, or [`RpcError::PartialBatchFailure`] carrying the partial
    /// results and the failure point.
    pub fn into_result(self) -> Result<Vec<Value>> {
        match self.failure {
            None => Ok(self.results),
            Some(AtomicFailure { index, error }) => Err(RpcError::PartialBatchFailure {
                index,
                error,
                results: self.results,
            }),
        }
    }
}

/// Accumulates calls for one atomic batch.
#[derive(Debug, Clone, Default)]
pub struct AtomicCallBuilder {
    calls: Vec<(String, Vec<Value>)>,
}

impl AtomicCallBuilder {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a call. Nothing is sent until [`send`](Self::send).
    pub fn add(mut self, method: impl Into<String>, params: Vec<Value>) -> Self {
        self.calls.push((method.into(), params));
        self
    }

    /// Number of queued calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call is queued.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The request parameters: one array holding `[method, params]` pairs.
    pub fn to_params(&self) -> Vec<Value> {
        let calls = self
            .calls
            .iter()
            .map(|(method, params)| {
                Value::Array(vec![
                    Value::from(method.as_str()),
                    Value::Array(params.clone()),
                ])
            })
            .collect();
        vec![Value::Array(calls)]
    }

    /// Send the batch as one request and decode the outcome.
    ///
    /// A failing call inside the batch is reported through
    /// [`AtomicOutcome::failure`], not as an error; errors are reserved for
    /// the request itself failing.
    pub async fn send(self, client: &RpcClient) -> Result<AtomicOutcome> {
        tracing::debug!("Sending atomic batch of {} calls", self.calls.len());
        let value = client.call(api::CALL_ATOMIC, self.to_params()).await?;
        AtomicOutcome::from_value(value)
    }
}
