//! Broker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker configuration shared by stubs, skeletons and the distributed lock.
///
/// In most cases the default configuration ([Cfg::default]) is fine and should be used.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cfg {
    /// Time after which an outgoing remote call is abandoned.
    ///
    /// This covers connecting, sending the request and receiving the reply.
    /// An abandoned call fails with [CommunicationError::Timeout](crate::CommunicationError::Timeout).
    /// By default this is 30 seconds.
    pub call_timeout: Option<Duration>,
    /// Maximum length of a single request or reply line in bytes.
    ///
    /// By default this is 1 MiB.
    /// This must not be zero.
    pub max_line_length: usize,
    /// Interval after which a waiting [acquire](crate::DistributedLock::acquire)
    /// re-checks the lock state even if it has not been notified.
    ///
    /// By default this is 100 milliseconds.
    /// This must not be zero.
    pub poll_interval: Duration,
    /// Pause after accepting a connection failed before accepting again.
    ///
    /// By default this is 10 milliseconds.
    pub accept_backoff: Duration,
    #[doc(hidden)]
    #[serde(skip)]
    pub _non_exhaustive: (),
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(30)),
            max_line_length: 1_048_576,
            poll_interval: Duration::from_millis(100),
            accept_backoff: Duration::from_millis(10),
            _non_exhaustive: (),
        }
    }
}

impl Cfg {
    /// Checks the configuration.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub(crate) fn check(&self) {
        if self.max_line_length == 0 {
            panic!("maximum line length must not be zero");
        }

        if self.poll_interval.is_zero() {
            panic!("poll interval must not be zero");
        }

        if self.call_timeout == Some(Duration::ZERO) {
            panic!("call timeout must not be zero");
        }
    }
}
