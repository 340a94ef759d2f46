//! Distributed mutual exclusion over a list of peers.
//!
//! This implements the second Ricart-Agrawala algorithm.
//! A single token circulates among the peers; only the peer holding it may
//! enter its critical section.
//! A peer wanting the token sends its request, stamped with its logical time,
//! to all other peers.
//! Requests are recorded and honored the next time the token becomes idle.
//!
//! # Usage
//!
//! Create a [DistributedLock] for a [PeerList] and expose its [methods](DistributedLock::methods)
//! through the owning [Peer](crate::Peer).
//! After the peer list has been populated, call [initialize](DistributedLock::initialize):
//! the peer with the smallest id (or a peer that is alone) starts with the token.
//! Then use [acquire](DistributedLock::acquire) and [release](DistributedLock::release)
//! around the critical section.
//! Before the peer leaves, call [destroy](DistributedLock::destroy) to pass the token on.
//! The [Node](crate::Node) type performs all of these steps.
//!
//! # Fairness
//!
//! When the token is released it is passed to the first peer with an unsatisfied request,
//! scanning the peers with an id greater than the local id in ascending order first and
//! then the peers with a smaller id.
//!
//! # Failures
//!
//! A peer that cannot be reached is skipped: requests are not delivered to it and the
//! token is passed to the next candidate instead.
//! Unreachable peers are never reported to the caller of [acquire](DistributedLock::acquire)
//! or [release](DistributedLock::release).
//!
//! A peer dying while holding the token without calling [destroy](DistributedLock::destroy)
//! leaves the system without a token.
//! There is no recovery from this.

use serde_json::Value;
use std::{error::Error, fmt, sync::Arc, time::Duration};
use tokio::sync::{MutexGuard, Notify};

use crate::{
    peer_list::{Members, PeerList, SharedMembers},
    rtc::{Dispatcher, RemoteError},
    Cfg, PeerId,
};

mod state;

pub use state::{Clock, LockState, LockStatus, RequestRecord, Token};
pub(crate) use state::LockCore;

/// A distributed lock operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The owning peer has not joined the peer list yet.
    NotInitialized,
    /// The lock is already held or being acquired by this peer.
    Reentrant,
    /// The lock is not held by this peer.
    NotHeld,
    /// The peer is not a member of the peer list.
    UnknownPeer(PeerId),
}

impl LockError {
    /// Name of the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NotInitialized",
            Self::Reentrant => "Reentrant",
            Self::NotHeld => "NotHeld",
            Self::UnknownPeer(_) => "UnknownPeer",
        }
    }
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "lock not initialized"),
            Self::Reentrant => write!(f, "lock already held or being acquired"),
            Self::NotHeld => write!(f, "lock not held"),
            Self::UnknownPeer(pid) => write!(f, "unknown peer {}", pid),
        }
    }
}

impl Error for LockError {}

impl From<LockError> for RemoteError {
    fn from(err: LockError) -> Self {
        let args = match &err {
            LockError::UnknownPeer(pid) => vec![Value::from(*pid)],
            _ => Vec::new(),
        };
        RemoteError::new(err.kind(), args)
    }
}

/// Distributed mutual exclusion among the peers of a [PeerList].
///
/// The lock state is guarded by the same mutex as the membership of the peer list,
/// so that peers joining or leaving never race with token bookkeeping.
/// The mutex is never held while calling another peer.
///
/// Cloning yields another handle to the same lock.
#[derive(Clone)]
pub struct DistributedLock {
    members: SharedMembers,
    granted: Arc<Notify>,
    poll_interval: Duration,
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DistributedLock").finish_non_exhaustive()
    }
}

impl DistributedLock {
    /// Creates a distributed lock among the peers of the specified peer list.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn new(peer_list: &PeerList, cfg: &Cfg) -> Self {
        cfg.check();
        Self {
            members: peer_list.shared(),
            granted: Arc::new(Notify::new()),
            poll_interval: cfg.poll_interval,
        }
    }

    /// Methods of the lock that other peers call remotely.
    ///
    /// These are `request_token(time, id)` and `obtain_token(token)`.
    pub fn methods(&self) -> Dispatcher {
        let mut methods = Dispatcher::new();

        let lock = self.clone();
        methods.register("request_token", move |(time, pid): (Clock, PeerId)| {
            let lock = lock.clone();
            async move { lock.request_token(time, pid).await }
        });

        let lock = self.clone();
        methods.register("obtain_token", move |(token,): (Token,)| {
            let lock = lock.clone();
            async move { lock.obtain_token(token).await }
        });

        methods
    }

    /// Sets up the initial lock state.
    ///
    /// The peer list must already be populated.
    pub async fn initialize(&self) -> Result<(), LockError> {
        let mut members = self.members.lock().await;
        let owner = members.owner.ok_or(LockError::NotInitialized)?;

        let ids = members.ids();
        members.lock.initialize(owner, &ids);
        log::info!("peer {} initialized lock with {}", owner, members.lock.state);
        Ok(())
    }

    /// Passes the token on before the owning peer leaves.
    ///
    /// If the token is held locally, it is first released as usual.
    /// If no peer has requested it, it is given to the first reachable peer
    /// in ascending id order.
    pub async fn destroy(&self) {
        let mut members = self.members.lock().await;
        let owner = match members.owner {
            Some(owner) => owner,
            None => return,
        };

        members.lock.waiting = false;
        if members.lock.has_token() && !members.peers.is_empty() {
            members.lock.state = LockState::TokenPresent;
            let order = release_order(owner, &members);
            members = self.hand_over(members, order, false).await;

            if members.lock.has_token() {
                let order = members.ids();
                members = self.hand_over(members, order, true).await;
            }

            if members.lock.has_token() {
                log::warn!("peer {} is leaving with the token since no peer took it", owner);
            }
        }

        members.lock.token = None;
        members.lock.state = LockState::NoToken;
    }

    /// Adds a peer to the lock bookkeeping.
    pub async fn register_peer(&self, pid: PeerId) {
        self.members.lock().await.lock.register_peer(pid);
    }

    /// Removes a peer from the lock bookkeeping.
    pub async fn unregister_peer(&self, pid: PeerId) {
        self.members.lock().await.lock.unregister_peer(pid);
    }

    /// Acquires the lock, waiting until the token is obtained.
    ///
    /// Peers that cannot be reached are skipped.
    /// This waits forever if no reachable peer ever passes the token.
    ///
    /// Acquiring while the lock is already held or being acquired by this peer
    /// fails with [LockError::Reentrant].
    pub async fn acquire(&self) -> Result<(), LockError> {
        let mut members = self.members.lock().await;
        let owner = members.owner.ok_or(LockError::NotInitialized)?;

        if members.lock.waiting || members.lock.state == LockState::TokenHeld {
            return Err(LockError::Reentrant);
        }

        let time = members.lock.tick(owner);
        if members.lock.state == LockState::TokenPresent {
            members.lock.state = LockState::TokenHeld;
            log::debug!("peer {} acquired idle token at time {}", owner, time);
            return Ok(());
        }

        members.lock.waiting = true;
        let peers: Vec<_> = members.peers.iter().map(|(pid, stub)| (*pid, stub.clone())).collect();
        drop(members);

        let mut pending = PendingAcquire(Some(self.clone()));

        log::debug!("peer {} requesting token at time {}", owner, time);
        for (pid, stub) in peers {
            if let Err(err) = stub.call::<_, ()>("request_token", (time, owner)).await {
                log::warn!("requesting token from peer {} failed: {}", pid, err);
            }
        }

        loop {
            let granted = self.granted.notified();

            {
                let mut members = self.members.lock().await;
                if members.lock.state == LockState::TokenHeld {
                    members.lock.waiting = false;
                    pending.0 = None;
                    log::debug!("peer {} obtained token for request at time {}", owner, time);
                    return Ok(());
                }
            }

            let _ = tokio::time::timeout(self.poll_interval, granted).await;
        }
    }

    /// Releases the lock, passing the token to a peer that requested it.
    ///
    /// If no peer requested the token, it is kept locally.
    pub async fn release(&self) -> Result<(), LockError> {
        let mut members = self.members.lock().await;
        let owner = members.owner.ok_or(LockError::NotInitialized)?;

        if members.lock.state != LockState::TokenHeld {
            return Err(LockError::NotHeld);
        }

        members.lock.state = LockState::TokenPresent;
        let order = release_order(owner, &members);
        drop(self.hand_over(members, order, false).await);
        Ok(())
    }

    /// Records a token request of another peer.
    ///
    /// If the token is idle here, it is passed on by a separate task,
    /// so that the caller is answered without waiting for the hand-over.
    pub async fn request_token(&self, time: Clock, pid: PeerId) -> Result<(), LockError> {
        let mut members = self.members.lock().await;
        members.lock.record_request(pid, time)?;
        log::debug!("peer {} requests token at time {}", pid, time);

        if members.lock.state == LockState::TokenPresent {
            self.spawn_honor_pending();
        }
        Ok(())
    }

    /// Receives the token from another peer.
    ///
    /// If a local acquire is waiting for it, the owner enters its critical section.
    /// Otherwise the token is kept idle, unless another peer has requested it.
    ///
    /// The token is always accepted before it is passed on again, so that the sender
    /// never waits for a further hand-over.
    pub async fn obtain_token(&self, token: Token) -> Result<(), LockError> {
        let mut members = self.members.lock().await;
        let owner = members.owner.ok_or(LockError::NotInitialized)?;

        if members.lock.has_token() {
            log::error!("peer {} received a token while already having one", owner);
        }

        let ids = members.ids();
        let state = members.lock.accept_token(owner, token, &ids);
        match state {
            LockState::TokenHeld => {
                log::debug!("peer {} received requested token", owner);
                self.granted.notify_waiters();
            }
            LockState::TokenPresent => {
                log::debug!("peer {} received token without request", owner);
                if members.lock.any_pending(&ids) {
                    self.spawn_honor_pending();
                }
            }
            LockState::NoToken => (),
        }
        Ok(())
    }

    /// Current lock state.
    pub async fn state(&self) -> LockState {
        self.members.lock().await.lock.state
    }

    /// Snapshot of the lock bookkeeping.
    pub async fn status(&self) -> LockStatus {
        self.members.lock().await.lock.status()
    }

    /// Passes the idle token to the first candidate in `order` that takes it.
    ///
    /// Unless `force` is set, only candidates with a pending request are considered.
    /// The mutex is released while calling a candidate; if the candidate cannot be
    /// reached or refuses the token, it is reinstalled locally and the scan continues.
    async fn hand_over<'a>(
        &'a self, mut members: MutexGuard<'a, Members>, order: Vec<PeerId>, force: bool,
    ) -> MutexGuard<'a, Members> {
        let owner = match members.owner {
            Some(owner) => owner,
            None => return members,
        };

        for pid in order {
            if members.lock.state != LockState::TokenPresent {
                break;
            }
            if !force && !members.lock.is_pending(pid) {
                continue;
            }

            let stub = match members.peers.get(&pid) {
                Some(stub) => stub.clone(),
                None => continue,
            };
            let token = match members.lock.take_token(owner) {
                Some(token) => token,
                None => break,
            };
            drop(members);

            log::debug!("peer {} passing token to peer {}", owner, pid);
            let res = stub.call::<_, ()>("obtain_token", (&token,)).await;
            members = self.members.lock().await;

            match res {
                Ok(()) => {
                    log::info!("peer {} passed token to peer {}", owner, pid);
                    break;
                }
                Err(err) => {
                    log::warn!("passing token to peer {} failed: {}", pid, err);
                    let ids = members.ids();
                    if members.lock.accept_token(owner, token, &ids) == LockState::TokenHeld {
                        self.granted.notify_waiters();
                    }
                }
            }
        }

        members
    }

    /// Passes the idle token to a pending requester on a separate task.
    fn spawn_honor_pending(&self) {
        let lock = self.clone();
        tokio::spawn(async move { lock.honor_pending().await });
    }

    async fn honor_pending(&self) {
        let members = self.members.lock().await;
        if let (Some(owner), LockState::TokenPresent) = (members.owner, members.lock.state) {
            let order = release_order(owner, &members);
            drop(self.hand_over(members, order, false).await);
        }
    }

    /// Cleans up after an acquire was cancelled while waiting.
    async fn abandon(&self) {
        let mut members = self.members.lock().await;
        members.lock.waiting = false;

        if let (Some(owner), LockState::TokenHeld) = (members.owner, members.lock.state) {
            log::debug!("peer {} abandoned acquire, releasing token", owner);
            members.lock.state = LockState::TokenPresent;
            let order = release_order(owner, &members);
            drop(self.hand_over(members, order, false).await);
        }
    }
}

/// Candidates for receiving the token: peers with greater id first, then peers with smaller id,
/// each in ascending order.
fn release_order(owner: PeerId, members: &Members) -> Vec<PeerId> {
    let (left, right): (Vec<_>, Vec<_>) =
        members.peers.keys().copied().filter(|&pid| pid != owner).partition(|&pid| pid < owner);
    right.into_iter().chain(left).collect()
}

/// Releases an acquire attempt that is dropped before obtaining the token.
struct PendingAcquire(Option<DistributedLock>);

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if let Some(lock) = self.0.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { lock.abandon().await });
            }
        }
    }
}
