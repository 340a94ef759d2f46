//! Tools for sending [BTreeMap]s with non-string keys over the JSON wire format.
//!
//! [BTreeMap]: std::collections::BTreeMap

pub mod btreemap;
