//! A peer taking part in distributed mutual exclusion.

use std::{error::Error, fmt, io};

use crate::{
    rtc::{CallError, Dispatcher},
    Cfg, DistributedLock, LockError, Peer, PeerAddress, PeerError, PeerList, Stub,
};

/// Starting or stopping a node failed.
#[derive(Debug, Clone)]
pub enum NodeError {
    /// Registering with or unregistering from the name service failed.
    Peer(PeerError),
    /// Obtaining the peers from the name service failed.
    Call(CallError),
    /// Setting up the lock failed.
    Lock(LockError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Peer(err) => write!(f, "{}", err),
            Self::Call(err) => write!(f, "obtaining peers failed: {}", err),
            Self::Lock(err) => write!(f, "{}", err),
        }
    }
}

impl Error for NodeError {}

impl From<PeerError> for NodeError {
    fn from(err: PeerError) -> Self {
        Self::Peer(err)
    }
}

impl From<CallError> for NodeError {
    fn from(err: CallError) -> Self {
        Self::Call(err)
    }
}

impl From<LockError> for NodeError {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

/// A [Peer] with its [PeerList] and [DistributedLock].
///
/// The methods of all three are served by the peer's skeleton.
#[derive(Debug)]
pub struct Node {
    peer: Peer,
    peer_list: PeerList,
    lock: DistributedLock,
}

impl Node {
    /// Binds a node of the specified type.
    ///
    /// Additional methods to serve can be passed in `methods`.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub async fn bind(
        cfg: Cfg, bind: PeerAddress, name_service: PeerAddress, ptype: impl Into<String>,
        mut methods: Dispatcher,
    ) -> io::Result<Self> {
        let ptype = ptype.into();
        let peer_list =
            PeerList::new(Stub::with_cfg(name_service.clone(), cfg.clone()), ptype.clone(), cfg.clone());
        let lock = DistributedLock::new(&peer_list, &cfg);

        methods.merge(peer_list.methods());
        methods.merge(lock.methods());
        let peer = Peer::bind(cfg, bind, name_service, ptype, methods).await?;

        Ok(Self { peer, peer_list, lock })
    }

    /// Registers with the name service, joins the peers of the same type and sets up the lock.
    pub async fn start(&self) -> Result<(), NodeError> {
        let id = self.peer.start().await?;
        self.peer_list.initialize(id, self.peer.address()).await?;
        self.lock.initialize().await?;
        Ok(())
    }

    /// Passes the token on, leaves the peers of the same type and unregisters from the name service.
    pub async fn destroy(&self) -> Result<(), NodeError> {
        self.lock.destroy().await;
        self.peer_list.destroy().await;
        self.peer.destroy().await?;
        Ok(())
    }

    /// The peer.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The other peers of the same type.
    pub fn peer_list(&self) -> &PeerList {
        &self.peer_list
    }

    /// The distributed lock.
    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }
}
