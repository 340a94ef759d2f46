//! Orbex: a minimal object request broker with distributed mutual exclusion.
//!
//! Independent processes ("peers") find each other through a name service,
//! invoke methods on each other over a newline-delimited JSON protocol and
//! coordinate exclusive access to a shared resource without a central arbiter.
//!
//! # Layers
//!
//!   * [rtc]: remote calling. The [Stub](rtc::Stub) forwards a method name and positional
//!     arguments to a remote address, the [Skeleton](rtc::Skeleton) accepts connections and
//!     dispatches each request onto a [method table](rtc::Dispatcher).
//!   * [peer]: a [Peer](peer::Peer) composes one skeleton serving its methods and one stub
//!     bound to the name service.
//!   * [peer_list]: the membership manager tracking the other peers of the same type.
//!   * [lock]: token based mutual exclusion following the second Ricart-Agrawala algorithm.
//!   * [node]: a peer running all of the above.
//!
//! # Wire format
//!
//! One request per connection, one reply per request:
//!
//! ```text
//! -> {"method": "request_token", "args": [1, 3]}
//! <- {"result": null}
//! ```
//!
//! A failed call replies with `{"error": {"name": <kind>, "args": [...]}}`.
//! See [msg] for details.
//!

mod cfg;
pub mod codec;
pub mod lock;
pub mod msg;
pub mod node;
pub mod peer;
pub mod peer_list;
pub mod rtc;

pub use cfg::Cfg;
pub use lock::{Clock, DistributedLock, LockError, LockState, LockStatus, Token};
pub use node::{Node, NodeError};
pub use peer::{Peer, PeerAddress, PeerError, PeerId};
pub use peer_list::PeerList;
pub use rtc::{CallError, CommunicationError, Dispatcher, RemoteError, Skeleton, Stub};
