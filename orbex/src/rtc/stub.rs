use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{fmt, sync::Arc};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use super::{decode_result, CallError, CommunicationError, IntoArgs};
use crate::{
    codec::Json,
    msg::{Reply, Request},
    Cfg, PeerAddress,
};

/// The local image of an object located on a remote endpoint.
///
/// Any method name can be called on a stub; it is forwarded together with the
/// positional arguments to the remote address.
/// Each call uses its own connection.
///
/// Stubs are cheap to clone.
#[derive(Clone)]
pub struct Stub {
    address: PeerAddress,
    cfg: Arc<Cfg>,
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stub").field("address", &self.address).finish()
    }
}

impl Stub {
    /// Creates a stub for the object listening at the specified address
    /// using the default configuration.
    pub fn new(address: PeerAddress) -> Self {
        Self::with_cfg(address, Cfg::default())
    }

    /// Creates a stub for the object listening at the specified address.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub fn with_cfg(address: PeerAddress, cfg: Cfg) -> Self {
        cfg.check();
        Self { address, cfg: Arc::new(cfg) }
    }

    pub(crate) fn with_shared_cfg(address: PeerAddress, cfg: Arc<Cfg>) -> Self {
        Self { address, cfg }
    }

    /// The address of the remote object.
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Calls the method with the specified name on the remote object and
    /// decodes its result.
    ///
    /// Arguments are passed as a tuple, for example `stub.call("request_token", (time, id))`.
    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R, CallError>
    where
        A: IntoArgs,
        R: DeserializeOwned,
    {
        let args = args.into_args()?;
        let value = self.call_raw(method, args).await?;
        decode_result(value)
    }

    /// Calls the method with the specified name on the remote object using
    /// untyped arguments and result.
    pub async fn call_raw(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let line = Json::encode(&Request::new(method, args))?;
        log::trace!("calling {} on {}", method, &self.address);

        let reply_line = match self.cfg.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.exchange(line)).await {
                Ok(res) => res?,
                Err(_) => return Err(CommunicationError::Timeout.into()),
            },
            None => self.exchange(line).await?,
        };

        let reply: Reply = Json::decode(&reply_line)?;
        match reply {
            Reply::Result(value) => Ok(value),
            Reply::Error(err) => {
                log::debug!("call of {} on {} failed remotely: {}", method, &self.address, &err);
                Err(CallError::Remote(err))
            }
        }
    }

    /// Sends one request line over a fresh connection and receives one reply line.
    async fn exchange(&self, line: String) -> Result<String, CommunicationError> {
        let stream = TcpStream::connect((self.address.host(), self.address.port())).await?;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(self.cfg.max_line_length));

        framed.send(line).await?;

        match framed.next().await {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => Err(err.into()),
            None => Err(CommunicationError::NoReply),
        }
    }
}
