//! Messages exchanged between a [Stub](crate::Stub) and a [Skeleton](crate::Skeleton).
//!
//! A connection carries exactly one [Request] line from the caller followed by
//! exactly one [Reply] line from the callee, after which it is closed.
//! There is no pipelining and no multiplexing.
//!
//! Arguments and results are plain JSON values.
//! Values whose natural form is not representable in JSON, for example maps with
//! integer keys, must be converted by the component sending them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rtc::RemoteError;

/// A method invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Name of the method to invoke on the remote owner.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    /// Creates a new request.
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self { method: method.into(), args }
    }
}

/// The reply to a [Request].
///
/// Encoded as `{"result": <value>}` or `{"error": {"name": <kind>, "args": [...]}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    /// The method executed and returned a value.
    Result(Value),
    /// Decoding or executing the request failed.
    Error(RemoteError),
}

impl From<Result<Value, RemoteError>> for Reply {
    fn from(res: Result<Value, RemoteError>) -> Self {
        match res {
            Ok(value) => Self::Result(value),
            Err(err) => Self::Error(err),
        }
    }
}

impl From<Reply> for Result<Value, RemoteError> {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Result(value) => Ok(value),
            Reply::Error(err) => Err(err),
        }
    }
}
