//! Membership of peers of the same type.
//!
//! A [PeerList] learns the current members from the name service when its peer joins
//! and afterwards keeps up to date through the `register_peer` and `unregister_peer`
//! calls that joining and leaving peers make on every member.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};
use tokio::sync::Mutex;

use crate::{
    lock::LockCore,
    rtc::{CallError, Dispatcher, RemoteError, Stub},
    Cfg, PeerAddress, PeerId,
};

/// Membership and lock bookkeeping, guarded by a single mutex.
#[derive(Debug, Default)]
pub(crate) struct Members {
    /// Id of the owning peer, once it has joined.
    pub owner: Option<PeerId>,
    /// All other members.
    pub peers: BTreeMap<PeerId, Stub>,
    pub lock: LockCore,
}

pub(crate) type SharedMembers = Arc<Mutex<Members>>;

impl Members {
    /// Ids of all other members in ascending order.
    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Adds a member and returns whether it was new.
    fn insert(&mut self, pid: PeerId, stub: Stub) -> bool {
        if self.owner == Some(pid) {
            return false;
        }
        let new = self.peers.insert(pid, stub).is_none();
        self.lock.register_peer(pid);
        new
    }

    /// Removes a member and returns whether it was known.
    fn remove(&mut self, pid: PeerId) -> bool {
        if self.owner == Some(pid) {
            return false;
        }
        let known = self.peers.remove(&pid).is_some();
        self.lock.unregister_peer(pid);
        known
    }
}

/// The other peers of the same type as the owning peer.
///
/// Cloning yields another handle to the same list.
#[derive(Clone)]
pub struct PeerList {
    members: SharedMembers,
    name_service: Stub,
    ptype: String,
    cfg: Arc<Cfg>,
}

impl fmt::Debug for PeerList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PeerList").field("type", &self.ptype).finish_non_exhaustive()
    }
}

impl PeerList {
    /// Creates an empty peer list for peers of the specified type.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn new(name_service: Stub, ptype: impl Into<String>, cfg: Cfg) -> Self {
        cfg.check();
        Self {
            members: Arc::new(Mutex::new(Members::default())),
            name_service,
            ptype: ptype.into(),
            cfg: Arc::new(cfg),
        }
    }

    pub(crate) fn shared(&self) -> SharedMembers {
        self.members.clone()
    }

    /// Methods of the peer list that other peers call remotely.
    ///
    /// These are `register_peer(id, address)` and `unregister_peer(id)`.
    pub fn methods(&self) -> Dispatcher {
        let mut methods = Dispatcher::new();

        let list = self.clone();
        methods.register("register_peer", move |(pid, address): (PeerId, PeerAddress)| {
            let list = list.clone();
            async move {
                list.register_peer(pid, address).await;
                Ok::<_, RemoteError>(())
            }
        });

        let list = self.clone();
        methods.register("unregister_peer", move |(pid,): (PeerId,)| {
            let list = list.clone();
            async move {
                list.unregister_peer(pid).await;
                Ok::<_, RemoteError>(())
            }
        });

        methods
    }

    /// Joins the peers of this type as `owner`, reachable at `address`.
    ///
    /// Obtains the current members from the name service and announces the owner to each of them.
    /// Members that cannot be reached are kept; they are removed when they unregister.
    pub async fn initialize(&self, owner: PeerId, address: &PeerAddress) -> Result<(), CallError> {
        let all: Vec<(PeerId, PeerAddress)> = self.name_service.call("require_all", (&self.ptype,)).await?;

        let peers = {
            let mut members = self.members.lock().await;
            members.owner = Some(owner);
            members.lock.register_peer(owner);
            for (pid, address) in all {
                if pid != owner {
                    members.insert(pid, Stub::with_shared_cfg(address, self.cfg.clone()));
                }
            }
            members.peers.clone()
        };
        log::info!("peer {} joined peers {:?}", owner, peers.keys().collect::<Vec<_>>());

        for (pid, stub) in peers {
            if let Err(err) = stub.call::<_, ()>("register_peer", (owner, address)).await {
                log::warn!("announcing peer {} to peer {} failed: {}", owner, pid, err);
            }
        }

        Ok(())
    }

    /// Leaves the peers of this type.
    ///
    /// Announces the departure to every member and forgets all members.
    pub async fn destroy(&self) {
        let (owner, peers) = {
            let mut members = self.members.lock().await;
            let owner = match members.owner.take() {
                Some(owner) => owner,
                None => return,
            };
            let peers = std::mem::take(&mut members.peers);
            for pid in peers.keys() {
                members.lock.unregister_peer(*pid);
            }
            (owner, peers)
        };

        for (pid, stub) in peers {
            if let Err(err) = stub.call::<_, ()>("unregister_peer", (owner,)).await {
                log::warn!("announcing departure of peer {} to peer {} failed: {}", owner, pid, err);
            }
        }
        log::info!("peer {} left", owner);
    }

    /// Adds a member.
    pub async fn register_peer(&self, pid: PeerId, address: PeerAddress) {
        let stub = Stub::with_shared_cfg(address, self.cfg.clone());
        if self.members.lock().await.insert(pid, stub) {
            log::info!("peer {} joined", pid);
        }
    }

    /// Removes a member.
    pub async fn unregister_peer(&self, pid: PeerId) {
        if self.members.lock().await.remove(pid) {
            log::info!("peer {} left", pid);
        }
    }

    /// Id of the owning peer, once it has joined.
    pub async fn owner(&self) -> Option<PeerId> {
        self.members.lock().await.owner
    }

    /// Ids of all other members.
    pub async fn get_peers(&self) -> BTreeSet<PeerId> {
        self.members.lock().await.peers.keys().copied().collect()
    }

    /// Stubs of all other members.
    pub async fn peers(&self) -> BTreeMap<PeerId, Stub> {
        self.members.lock().await.peers.clone()
    }

    /// Stub of the specified member.
    pub async fn peer(&self, pid: PeerId) -> Option<Stub> {
        self.members.lock().await.peers.get(&pid).cloned()
    }
}
