use futures::{future::BoxFuture, Future, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::{any::Any, collections::HashMap, fmt, panic::AssertUnwindSafe, sync::Arc};

use super::{kind, FromArgs, RemoteError};
use crate::{
    codec::Json,
    msg::{Reply, Request},
};

/// The future returned by a method handler.
pub type MethodFuture = BoxFuture<'static, Result<Value, RemoteError>>;

type Method = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

/// A table of remotely callable methods.
///
/// Maps each method name to a handler taking the positional arguments of
/// the request and returning the result or an error.
/// Each exposed service builds its own table; tables are combined using [merge](Self::merge).
#[derive(Clone, Default)]
pub struct Dispatcher {
    methods: HashMap<String, Method>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Dispatcher").field("methods", &names).finish()
    }
}

impl Dispatcher {
    /// Creates an empty method table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed method handler under the specified name.
    ///
    /// The positional arguments of a request are decoded into the tuple `A`.
    /// A request with a wrong number or type of arguments fails with
    /// [InvalidArguments](kind::INVALID_ARGUMENTS) without invoking the handler.
    ///
    /// An existing method with the same name is replaced.
    pub fn register<A, R, E, F, Fut>(&mut self, name: &str, fun: F) -> &mut Self
    where
        A: FromArgs + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<RemoteError> + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let fun = Arc::new(fun);
        let method: Method = Arc::new(move |args| {
            let fun = fun.clone();
            async move {
                let args = A::from_args(args)?;
                let result = match fun(args).await {
                    Ok(result) => result,
                    Err(err) => return Err(err.into()),
                };
                Json::to_value(&result).map_err(|err| RemoteError::with_msg(kind::SERIALIZATION_ERROR, err))
            }
            .boxed()
        });
        self.methods.insert(name.to_string(), method);
        self
    }

    /// Registers an untyped method handler under the specified name.
    pub fn register_raw<F>(&mut self, name: &str, fun: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> MethodFuture + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(fun));
        self
    }

    /// Adds all methods of another table, replacing methods with the same name.
    pub fn merge(&mut self, other: Dispatcher) -> &mut Self {
        self.methods.extend(other.methods);
        self
    }

    /// Names of all registered methods.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// True, if a method with the specified name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Invokes the method with the specified name.
    ///
    /// A panicking handler is reported as a [Panic](kind::PANIC) error.
    pub async fn dispatch(&self, method: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        let handler = match self.methods.get(method) {
            Some(handler) => handler.clone(),
            None => return Err(RemoteError::with_msg(kind::UNKNOWN_METHOD, method)),
        };

        match AssertUnwindSafe(handler(args)).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => {
                let msg = panic_message(&*payload);
                log::error!("method {} panicked: {}", method, &msg);
                Err(RemoteError::with_msg(kind::PANIC, msg))
            }
        }
    }

    /// Decodes a request line, invokes the requested method and returns the reply.
    pub async fn handle_line(&self, line: &str) -> Reply {
        let Request { method, args } = match Json::decode(line) {
            Ok(req) => req,
            Err(err) => return Reply::Error(RemoteError::with_msg(kind::PROTOCOL_ERROR, err)),
        };

        log::trace!("dispatching {}", &method);
        self.dispatch(&method, args).await.into()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
