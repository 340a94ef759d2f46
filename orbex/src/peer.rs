//! Peers: processes that are both callers and callees.
//!
//! A [Peer] serves its methods through a [Skeleton] and reaches the name service
//! through a [Stub].
//! When started it registers with the name service, which assigns it a [PeerId]
//! and a registration hash proving ownership of that id.
//!
//! # Name service interface
//!
//! The name service is a remote object providing at least:
//!
//!   * `register(type, address) -> (id, hash)`
//!   * `unregister(id, type, hash)`
//!   * `require_all(type) -> [(id, address)]`, used by the [PeerList](crate::PeerList).

use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt, io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};

use crate::{
    rtc::{CallError, Dispatcher, RemoteError, Skeleton, Stub},
    Cfg,
};

/// Identifier of a peer assigned by the name service.
///
/// Ids are unique within a run and totally ordered.
pub type PeerId = u64;

/// Network endpoint of a peer's skeleton as a `(host, port)` pair.
///
/// Transmitted as a two element list, for example `["127.0.0.1", 5000]`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress(pub String, pub u16);

impl PeerAddress {
    /// Creates a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self(host.into(), port)
    }

    /// Host name or IP address.
    pub fn host(&self) -> &str {
        &self.0
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.1
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.contains(':') {
            true => write!(f, "[{}]:{}", &self.0, self.1),
            false => write!(f, "{}:{}", &self.0, self.1),
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.ip().to_string(), addr.port())
    }
}

/// A peer operation failed.
#[derive(Debug, Clone)]
pub enum PeerError {
    /// The peer has already been started.
    AlreadyStarted,
    /// The peer is not registered with the name service.
    NotRegistered,
    /// Calling the name service failed.
    Call(CallError),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "peer already started"),
            Self::NotRegistered => write!(f, "peer not registered"),
            Self::Call(err) => write!(f, "name service call failed: {}", err),
        }
    }
}

impl Error for PeerError {}

impl From<CallError> for PeerError {
    fn from(err: CallError) -> Self {
        Self::Call(err)
    }
}

/// Registration obtained from the name service.
#[derive(Debug, Clone)]
struct Registration {
    id: PeerId,
    hash: String,
}

/// A process taking part in both roles, caller and callee.
///
/// All methods of the method table passed to [bind](Self::bind) become remotely
/// callable once the peer is [started](Self::start).
/// The peer itself adds the `check` method, which returns `(id, type)` and serves
/// as a liveness probe.
pub struct Peer {
    ptype: String,
    address: PeerAddress,
    name_service: Stub,
    registration: Arc<RwLock<Option<Registration>>>,
    skeleton: Mutex<Option<Skeleton>>,
    serving: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Peer").field("type", &self.ptype).field("address", &self.address).finish()
    }
}

impl Peer {
    /// Binds the peer's skeleton to the specified host and port.
    ///
    /// Port 0 selects a free port; the address advertised to the name service
    /// contains the actually bound port.
    ///
    /// The host is advertised as given, thus it must be reachable by the other peers.
    /// Binding to an unspecified address such as `0.0.0.0` accepts connections on all
    /// interfaces, but other peers cannot dial the advertised address.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub async fn bind(
        cfg: Cfg, bind: PeerAddress, name_service: PeerAddress, ptype: impl Into<String>,
        mut methods: Dispatcher,
    ) -> io::Result<Self> {
        let ptype = ptype.into();
        let registration = Arc::new(RwLock::new(None));

        methods.merge(Self::methods(ptype.clone(), registration.clone()));
        let skeleton = Skeleton::bind((bind.host(), bind.port()), methods, cfg.clone()).await?;
        let address = PeerAddress(bind.0, skeleton.local_addr()?.port());
        if address.host().parse::<IpAddr>().map(|ip| ip.is_unspecified()).unwrap_or_default() {
            log::warn!("peer of type {} advertises unspecified address {}", &ptype, &address);
        }
        log::debug!("peer of type {} listening on {}", &ptype, &address);

        Ok(Self {
            ptype,
            address,
            name_service: Stub::with_cfg(name_service, cfg),
            registration,
            skeleton: Mutex::new(Some(skeleton)),
            serving: std::sync::Mutex::new(None),
        })
    }

    /// Methods exposed by every peer.
    fn methods(ptype: String, registration: Arc<RwLock<Option<Registration>>>) -> Dispatcher {
        let mut methods = Dispatcher::new();
        methods.register("check", move |()| {
            let ptype = ptype.clone();
            let registration = registration.clone();
            async move {
                let id = registration.read().await.as_ref().map(|reg| reg.id);
                Ok::<_, RemoteError>((id, ptype))
            }
        });
        methods
    }

    /// Type of this peer.
    pub fn ptype(&self) -> &str {
        &self.ptype
    }

    /// Address of this peer's skeleton.
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Stub for the name service.
    pub fn name_service(&self) -> &Stub {
        &self.name_service
    }

    /// Id assigned by the name service, if registered.
    pub async fn id(&self) -> Option<PeerId> {
        self.registration.read().await.as_ref().map(|reg| reg.id)
    }

    /// Starts serving requests and registers with the name service.
    ///
    /// Returns the id assigned by the name service.
    pub async fn start(&self) -> Result<PeerId, PeerError> {
        let skeleton = self.skeleton.lock().await.take().ok_or(PeerError::AlreadyStarted)?;
        self.set_serving(Some(skeleton.spawn()));

        let (id, hash): (PeerId, String) =
            self.name_service.call("register", (&self.ptype, &self.address)).await?;
        log::info!("peer of type {} at {} registered with id {}", &self.ptype, &self.address, id);

        *self.registration.write().await = Some(Registration { id, hash });
        Ok(id)
    }

    /// Unregisters from the name service and stops serving requests.
    pub async fn destroy(&self) -> Result<(), PeerError> {
        let Registration { id, hash } =
            self.registration.write().await.take().ok_or(PeerError::NotRegistered)?;
        let res = self.name_service.call::<_, ()>("unregister", (id, &self.ptype, hash)).await;
        self.shutdown();

        res?;
        log::info!("peer {} unregistered", id);
        Ok(())
    }

    /// Stops serving requests without unregistering.
    ///
    /// Other peers see this peer as unreachable from now on.
    pub fn shutdown(&self) {
        if let Some(serving) = self.set_serving(None) {
            serving.abort();
        }
    }

    /// Returns the id and type of this peer.
    ///
    /// The id is `None` while the peer is not registered.
    pub async fn check(&self) -> (Option<PeerId>, String) {
        (self.id().await, self.ptype.clone())
    }

    fn set_serving(&self, serving: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        match self.serving.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, serving),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), serving),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
