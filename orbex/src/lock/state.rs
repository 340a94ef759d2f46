//! Local bookkeeping of the distributed lock.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt};

use super::LockError;
use crate::{codec::map::btreemap, PeerId};

/// Lamport-style logical time of a peer.
pub type Clock = u64;

/// For each peer the highest time at which it is locally known to want the token.
pub type RequestRecord = BTreeMap<PeerId, Clock>;

/// State of the distributed lock on one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    /// The token is not held locally.
    NoToken,
    /// The token is held locally but not used.
    TokenPresent,
    /// The token is held locally and the owner is inside its critical section.
    TokenHeld,
}

impl Default for LockState {
    fn default() -> Self {
        Self::NoToken
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoToken => write!(f, "no token"),
            Self::TokenPresent => write!(f, "token present"),
            Self::TokenHeld => write!(f, "token held"),
        }
    }
}

/// The unique permit for entering the critical section.
///
/// For each peer it records the time at which the token was last passed on
/// by or on behalf of that peer.
///
/// On the wire it is a list of `[peer id, time]` pairs, since JSON objects
/// only allow string keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Token(BTreeMap<PeerId, Clock>);

impl Token {
    /// Creates a token with all specified peers at time 0.
    pub fn new(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self(peers.into_iter().map(|pid| (pid, 0)).collect())
    }

    /// Time recorded for the specified peer; 0 if unknown.
    pub fn get(&self, pid: PeerId) -> Clock {
        self.0.get(&pid).copied().unwrap_or_default()
    }

    /// Records the time for the specified peer.
    pub fn set(&mut self, pid: PeerId, time: Clock) {
        self.0.insert(pid, time);
    }

    /// Peers recorded in the token.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.0.keys().copied()
    }

    /// The token as a map from peer id to time.
    pub fn as_map(&self) -> &BTreeMap<PeerId, Clock> {
        &self.0
    }
}

impl From<BTreeMap<PeerId, Clock>> for Token {
    fn from(map: BTreeMap<PeerId, Clock>) -> Self {
        Self(map)
    }
}

impl Serialize for Token {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        btreemap::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        btreemap::deserialize(deserializer).map(Self)
    }
}

/// Snapshot of the distributed lock of one peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    /// Lock state.
    pub state: LockState,
    /// Local logical time.
    pub time: Clock,
    /// Known requests.
    #[serde(with = "btreemap")]
    pub request: RequestRecord,
    /// The token, if held locally.
    pub token: Option<Token>,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "State   :: no token      : {}", self.state == LockState::NoToken)?;
        writeln!(f, "           token present : {}", self.state == LockState::TokenPresent)?;
        writeln!(f, "           token held    : {}", self.state == LockState::TokenHeld)?;
        writeln!(f, "Request :: {:?}", &self.request)?;
        match &self.token {
            Some(token) => writeln!(f, "Token   :: {:?}", token.as_map())?,
            None => writeln!(f, "Token   :: none")?,
        }
        write!(f, "Time    :: {}", self.time)
    }
}

/// Lock bookkeeping guarded together with the membership.
#[derive(Debug, Default)]
pub(crate) struct LockCore {
    pub state: LockState,
    pub time: Clock,
    pub request: RequestRecord,
    pub token: Option<Token>,
    /// A local acquire is waiting for the token.
    pub waiting: bool,
}

impl LockCore {
    /// Sets up the initial state for the owner and its current members.
    ///
    /// The owner starts with the token if it has the smallest id or is alone.
    /// A token that was handed over before initialization is kept.
    pub fn initialize(&mut self, owner: PeerId, members: &[PeerId]) {
        for &pid in members {
            self.request.entry(pid).or_insert(0);
        }
        self.request.insert(owner, 0);

        if let Some(token) = &mut self.token {
            for &pid in members {
                token.0.entry(pid).or_insert(0);
            }
            token.0.entry(owner).or_insert(0);
        } else if members.iter().all(|&pid| pid > owner) {
            let mut token = Token::new(members.iter().copied());
            token.set(owner, 0);
            self.token = Some(token);
            self.state = LockState::TokenPresent;
        } else {
            self.token = None;
            self.state = LockState::NoToken;
        }
    }

    pub fn register_peer(&mut self, pid: PeerId) {
        if let Some(token) = &mut self.token {
            token.0.entry(pid).or_insert(0);
        }
        self.request.entry(pid).or_insert(0);
    }

    pub fn unregister_peer(&mut self, pid: PeerId) {
        if let Some(token) = &mut self.token {
            token.0.remove(&pid);
        }
        self.request.remove(&pid);
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Starts a local acquire attempt and returns its time.
    pub fn tick(&mut self, owner: PeerId) -> Clock {
        self.time += 1;
        self.request.insert(owner, self.time);
        self.time
    }

    /// Records a request of another peer.
    pub fn record_request(&mut self, pid: PeerId, time: Clock) -> Result<(), LockError> {
        match self.request.get_mut(&pid) {
            Some(known) => {
                *known = (*known).max(time);
                Ok(())
            }
            None => Err(LockError::UnknownPeer(pid)),
        }
    }

    /// True, if the peer has a request that the token has not satisfied yet.
    pub fn is_pending(&self, pid: PeerId) -> bool {
        match &self.token {
            Some(token) => self.request.get(&pid).copied().unwrap_or_default() > token.get(pid),
            None => false,
        }
    }

    /// True, if any of the specified peers has a pending request.
    pub fn any_pending(&self, peers: &[PeerId]) -> bool {
        peers.iter().any(|&pid| self.is_pending(pid))
    }

    /// Takes the token out for passing it on.
    ///
    /// The owner's entry is stamped with the current time and the lock
    /// is left without token.
    pub fn take_token(&mut self, owner: PeerId) -> Option<Token> {
        let mut token = self.token.take()?;
        token.set(owner, self.time);
        self.state = LockState::NoToken;
        Some(token)
    }

    /// Installs a received token and returns the resulting state.
    ///
    /// The token is reconciled with the current membership: members missing from it
    /// are added at time 0 and departed peers are dropped.
    /// If a local acquire is waiting and its request has not been satisfied by the
    /// token yet, the owner enters its critical section, otherwise the token is kept idle.
    pub fn accept_token(&mut self, owner: PeerId, mut token: Token, members: &[PeerId]) -> LockState {
        token.0.retain(|pid, _| *pid == owner || members.contains(pid));
        for &pid in members {
            token.0.entry(pid).or_insert(0);
        }
        token.0.entry(owner).or_insert(0);

        self.state = if self.waiting && self.time > token.get(owner) {
            LockState::TokenHeld
        } else {
            LockState::TokenPresent
        };
        self.token = Some(token);
        self.state
    }

    pub fn status(&self) -> LockStatus {
        LockStatus {
            state: self.state,
            time: self.time,
            request: self.request.clone(),
            token: self.token.clone(),
        }
    }
}
