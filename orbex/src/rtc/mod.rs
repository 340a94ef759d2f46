//! Remote calling.
//!
//! This module allows calling methods on an object located on a remote endpoint.
//!
//! A [Stub] is the local image of a remote object.
//! Each call opens a fresh connection to the remote address, sends one
//! [request](crate::msg::Request), waits for one [reply](crate::msg::Reply)
//! and closes the connection.
//!
//! A [Skeleton] listens on an address, accepts connections and forwards each request
//! to a [Dispatcher], a table mapping method names to handler functions.
//! Every connection is served by its own task, so a slow or misbehaving caller
//! never blocks the accept loop or other callers.
//!
//! # Error handling
//!
//! A remote call can fail in two distinguishable ways, reported by [CallError]:
//!
//!   * [CommunicationError]: the remote endpoint could not be reached or did not
//!     reply with a well-formed message. This never crosses the network.
//!   * [RemoteError]: the remote endpoint executed the request but the method failed.
//!     It carries the remote error kind and arguments.
//!
//! There are no retries at this layer.
//!
//! # Example
//!
//! ```
//! use orbex::rtc::{Dispatcher, RemoteError, Skeleton, Stub};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut methods = Dispatcher::new();
//! methods.register("add", |(a, b): (i64, i64)| async move { Ok::<_, RemoteError>(a + b) });
//!
//! let skeleton = Skeleton::bind("127.0.0.1:0", methods, Default::default()).await.unwrap();
//! let stub = Stub::new(skeleton.local_addr().unwrap().into());
//! let _serving = skeleton.spawn();
//!
//! let sum: i64 = stub.call("add", (20, 22)).await.unwrap();
//! assert_eq!(sum, 42);
//! # }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{error::Error, fmt, io, sync::Arc};
use tokio_util::codec::LinesCodecError;

use crate::codec::{DeserializationError, Json, SerializationError};

mod dispatch;
mod skeleton;
mod stub;

pub use dispatch::{Dispatcher, MethodFuture};
pub use skeleton::Skeleton;
pub use stub::Stub;

/// Well-known remote error kinds produced by the broker itself.
pub mod kind {
    /// The request line could not be decoded.
    pub const PROTOCOL_ERROR: &str = "ProtocolError";
    /// The requested method is not provided by the remote owner.
    pub const UNKNOWN_METHOD: &str = "UnknownMethod";
    /// The arguments did not match the parameters of the method.
    pub const INVALID_ARGUMENTS: &str = "InvalidArguments";
    /// The return value of the method could not be serialized.
    pub const SERIALIZATION_ERROR: &str = "SerializationError";
    /// The method panicked.
    pub const PANIC: &str = "Panic";
}

/// The remote method was executed but failed.
///
/// This is also the error type returned by handlers registered in a [Dispatcher].
/// On the wire it is encoded as `{"name": <kind>, "args": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Kind of error, for example the name of the failed operation's error variant.
    #[serde(rename = "name")]
    pub kind: String,
    /// Error arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RemoteError {
    /// Creates a new remote error.
    pub fn new(kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self { kind: kind.into(), args }
    }

    /// Creates a new remote error with a single message argument.
    pub fn with_msg(kind: impl Into<String>, msg: impl fmt::Display) -> Self {
        Self::new(kind, vec![Value::String(msg.to_string())])
    }

    /// True, if the error is of the specified kind.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.kind)?;
        if !self.args.is_empty() {
            write!(f, "(")?;
            for (n, arg) in self.args.iter().enumerate() {
                if n > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl Error for RemoteError {}

/// Communicating with the remote endpoint failed.
#[derive(Debug, Clone)]
pub enum CommunicationError {
    /// Connecting, sending or receiving failed.
    Io(Arc<io::Error>),
    /// The call did not complete within the configured [call timeout](crate::Cfg::call_timeout).
    Timeout,
    /// The connection was closed before a reply was received.
    NoReply,
    /// A line exceeded the configured [maximum length](crate::Cfg::max_line_length).
    LineTooLong,
    /// The reply does not match the message schema.
    Protocol(DeserializationError),
    /// The request could not be serialized.
    Serialization(SerializationError),
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Timeout => write!(f, "call timed out"),
            Self::NoReply => write!(f, "connection closed without reply"),
            Self::LineTooLong => write!(f, "maximum line length exceeded"),
            Self::Protocol(err) => write!(f, "malformed reply: {}", err),
            Self::Serialization(err) => write!(f, "serialization error: {}", err),
        }
    }
}

impl Error for CommunicationError {}

impl From<io::Error> for CommunicationError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<LinesCodecError> for CommunicationError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::LineTooLong,
            LinesCodecError::Io(err) => Self::Io(Arc::new(err)),
        }
    }
}

impl From<DeserializationError> for CommunicationError {
    fn from(err: DeserializationError) -> Self {
        Self::Protocol(err)
    }
}

impl From<SerializationError> for CommunicationError {
    fn from(err: SerializationError) -> Self {
        Self::Serialization(err)
    }
}

/// Calling a method on a remote object failed.
#[derive(Debug, Clone)]
pub enum CallError {
    /// The remote endpoint was not reachable or replied with garbage.
    Communication(CommunicationError),
    /// The remote method failed.
    Remote(RemoteError),
}

impl CallError {
    /// True, if the remote endpoint should be considered unreachable.
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_))
    }

    /// The communication error, if the remote endpoint was not reachable.
    pub fn as_communication(&self) -> Option<&CommunicationError> {
        match self {
            Self::Communication(err) => Some(err),
            Self::Remote(_) => None,
        }
    }

    /// The remote error, if the remote method failed.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Communication(_) => None,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Communication(err) => write!(f, "communication error: {}", err),
            Self::Remote(err) => write!(f, "remote error: {}", err),
        }
    }
}

impl Error for CallError {}

impl From<CommunicationError> for CallError {
    fn from(err: CommunicationError) -> Self {
        Self::Communication(err)
    }
}

impl From<DeserializationError> for CallError {
    fn from(err: DeserializationError) -> Self {
        Self::Communication(err.into())
    }
}

impl From<SerializationError> for CallError {
    fn from(err: SerializationError) -> Self {
        Self::Communication(err.into())
    }
}

impl From<RemoteError> for CallError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

/// Converts a value into positional call arguments.
///
/// Implemented for tuples of serializable values and for a ready-made argument list.
pub trait IntoArgs {
    /// Serializes each element into a positional argument.
    fn into_args(self) -> Result<Vec<Value>, SerializationError>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, SerializationError> {
        Ok(self)
    }
}

/// Converts positional call arguments into a value.
///
/// Implemented for tuples of deserializable values.
/// The number of arguments must match the tuple length exactly.
pub trait FromArgs: Sized {
    /// Deserializes the positional arguments.
    fn from_args(args: Vec<Value>) -> Result<Self, RemoteError>;
}

macro_rules! impl_args {
    ($len:expr; $($ty:ident $var:ident),*) => {
        impl<$($ty),*> IntoArgs for ($($ty,)*)
        where
            $($ty: Serialize,)*
        {
            fn into_args(self) -> Result<Vec<Value>, SerializationError> {
                let ($($var,)*) = self;
                Ok(vec![$(Json::to_value(&$var)?),*])
            }
        }

        impl<$($ty),*> FromArgs for ($($ty,)*)
        where
            $($ty: DeserializeOwned,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn from_args(args: Vec<Value>) -> Result<Self, RemoteError> {
                if args.len() != $len {
                    return Err(RemoteError::with_msg(
                        kind::INVALID_ARGUMENTS,
                        format!("expected {} arguments but got {}", $len, args.len()),
                    ));
                }

                let mut args = args.into_iter();
                Ok(($(
                    {
                        let $var = args.next().unwrap_or(Value::Null);
                        Json::from_value::<$ty>($var)
                            .map_err(|err| RemoteError::with_msg(kind::INVALID_ARGUMENTS, err))?
                    },
                )*))
            }
        }
    };
}

impl_args!(0;);
impl_args!(1; A a);
impl_args!(2; A a, B b);
impl_args!(3; A a, B b, C c);
impl_args!(4; A a, B b, C c, D d);
impl_args!(5; A a, B b, C c, D d, E e);

/// Decodes the result value of a call.
pub(crate) fn decode_result<R>(value: Value) -> Result<R, CallError>
where
    R: DeserializeOwned,
{
    Ok(Json::from_value(value)?)
}
