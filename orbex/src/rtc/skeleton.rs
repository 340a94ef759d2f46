use futures::{SinkExt, StreamExt};
use std::{fmt, io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use super::{kind, Dispatcher, RemoteError};
use crate::{codec::Json, msg::Reply, Cfg};

/// Listens for incoming connections and forwards requests to a method table.
///
/// Every accepted connection is served by its own task:
/// it reads exactly one request line, invokes the requested method and
/// replies with exactly one line before closing the connection.
/// The number of simultaneously served connections is not limited.
pub struct Skeleton {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    cfg: Arc<Cfg>,
}

impl fmt::Debug for Skeleton {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Skeleton").field("local_addr", &self.listener.local_addr().ok()).finish()
    }
}

impl Skeleton {
    /// Binds to the specified address.
    ///
    /// Binding to port 0 selects a free port; use [local_addr](Self::local_addr)
    /// to obtain it.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub async fn bind(addr: impl ToSocketAddrs, dispatcher: Dispatcher, cfg: Cfg) -> io::Result<Self> {
        cfg.check();
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, dispatcher: Arc::new(dispatcher), cfg: Arc::new(cfg) })
    }

    /// The address this skeleton is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    ///
    /// Failing to accept a connection is logged and does not stop serving.
    pub async fn serve(self) {
        let Self { listener, dispatcher, cfg } = self;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    log::debug!("serving a request from {}", addr);
                    let dispatcher = dispatcher.clone();
                    let max_line_length = cfg.max_line_length;
                    tokio::spawn(async move {
                        handle_connection(stream, addr, &dispatcher, max_line_length).await;
                    });
                }
                Err(err) => {
                    log::warn!("accepting connection failed: {}", err);
                    tokio::time::sleep(cfg.accept_backoff).await;
                }
            }
        }
    }

    /// Spawns a task accepting connections forever.
    ///
    /// Aborting the returned task stops accepting new connections and closes
    /// the listening socket.
    /// Requests that are already being served run to completion.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.serve())
    }
}

/// Serves one request on the connection.
///
/// All failures are logged and end only this connection.
async fn handle_connection(
    stream: TcpStream, addr: SocketAddr, dispatcher: &Dispatcher, max_line_length: usize,
) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(max_line_length));

    let reply = match framed.next().await {
        Some(Ok(line)) => dispatcher.handle_line(&line).await,
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
            log::warn!("request from {} exceeds maximum line length", addr);
            Reply::Error(RemoteError::with_msg(kind::PROTOCOL_ERROR, "maximum line length exceeded"))
        }
        Some(Err(LinesCodecError::Io(err))) => {
            log::warn!("receiving request from {} failed: {}", addr, err);
            return;
        }
        None => {
            log::debug!("connection from {} closed without request", addr);
            return;
        }
    };

    if let Reply::Error(err) = &reply {
        log::debug!("request from {} failed: {}", addr, err);
    }

    let line = match Json::encode(&reply) {
        Ok(line) => line,
        Err(err) => {
            log::error!("encoding reply to {} failed: {}", addr, err);
            match Json::encode(&Reply::Error(RemoteError::with_msg(kind::SERIALIZATION_ERROR, err))) {
                Ok(line) => line,
                Err(_) => return,
            }
        }
    };

    if let Err(err) = framed.send(line).await {
        log::warn!("sending reply to {} failed: {}", addr, err);
    }
}
