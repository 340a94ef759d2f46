//! Serializes and deserializes a [BTreeMap]`<K, V>` as a list of `[key, value]` pairs.
//!
//! This is necessary since JSON does not support non-string keys on objects.
//! Pairs are emitted in ascending key order.
//!
//! Use by applying the attribute `#[serde(with = "orbex::codec::map::btreemap")]` on a field.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Default)]
//! pub struct Clocks {
//!     #[serde(with = "orbex::codec::map::btreemap")]
//!     by_peer: BTreeMap<u64, u64>,
//! }
//!
//! let mut clocks = Clocks::default();
//! clocks.by_peer.insert(3, 1);
//! clocks.by_peer.insert(1, 0);
//! assert_eq!(serde_json::to_string(&clocks).unwrap(), r#"{"by_peer":[[1,0],[3,1]]}"#);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Serialization function.
pub fn serialize<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    K: Serialize,
    V: Serialize,
{
    serializer.collect_seq(map.iter())
}

/// Deserialization function.
///
/// If a key occurs more than once, the last pair wins.
pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
{
    let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
    Ok(pairs.into_iter().collect())
}
