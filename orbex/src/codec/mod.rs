//! Codec for transforming values into and from the line-based wire format.
//!
//! Every request and reply is a single JSON document on one line.
//! The encoded text never contains a raw newline, since [serde_json] escapes
//! newlines inside strings and emits compact output.
//!
//! JSON only supports string keys in objects.
//! Maps keyed by other types, such as a [Token](crate::Token) keyed by peer ids,
//! are transmitted as lists of key-value pairs using the helpers in [map].

use serde::{de::DeserializeOwned, Serialize};
use std::{error::Error, fmt, sync::Arc};

pub mod map;

/// Reference counted error that is send, sync, static and clone.
pub type ArcError = Arc<dyn Error + Send + Sync + 'static>;

/// Serialization error.
#[derive(Debug, Clone)]
pub struct SerializationError(pub ArcError);

impl SerializationError {
    /// Creates a new serialization error.
    pub fn new<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl Error for SerializationError {}

/// Deserialization error.
#[derive(Debug, Clone)]
pub struct DeserializationError(pub ArcError);

impl DeserializationError {
    /// Creates a new deserialization error.
    pub fn new<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }
}

impl fmt::Display for DeserializationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl Error for DeserializationError {}

/// JSON line codec.
///
/// See [serde_json] for details.
#[derive(Clone, Debug)]
pub struct Json;

impl Json {
    /// Serializes the specified item into a single line of text without the
    /// terminating newline.
    pub fn encode<Item>(item: &Item) -> Result<String, SerializationError>
    where
        Item: Serialize,
    {
        serde_json::to_string(item).map_err(SerializationError::new)
    }

    /// Deserializes an item from a single line of text.
    pub fn decode<Item>(line: &str) -> Result<Item, DeserializationError>
    where
        Item: DeserializeOwned,
    {
        serde_json::from_str(line).map_err(DeserializationError::new)
    }

    /// Converts an item into a JSON value.
    pub fn to_value<Item>(item: &Item) -> Result<serde_json::Value, SerializationError>
    where
        Item: Serialize,
    {
        serde_json::to_value(item).map_err(SerializationError::new)
    }

    /// Converts a JSON value into an item.
    pub fn from_value<Item>(value: serde_json::Value) -> Result<Item, DeserializationError>
    where
        Item: DeserializeOwned,
    {
        serde_json::from_value(value).map_err(DeserializationError::new)
    }
}
