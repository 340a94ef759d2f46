use orbex::{
    rtc::{kind, RemoteError},
    Cfg, CommunicationError, Dispatcher, PeerAddress, Stub,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

use super::{serve, serve_with_cfg};

#[derive(Debug)]
enum IncreaseError {
    Overflow,
}

impl From<IncreaseError> for RemoteError {
    fn from(err: IncreaseError) -> Self {
        match err {
            IncreaseError::Overflow => RemoteError::with_msg("Overflow", "value too large"),
        }
    }
}

fn methods() -> Dispatcher {
    let mut methods = Dispatcher::new();
    methods.register("increase", |(value, by): (u8, u8)| async move {
        value.checked_add(by).ok_or(IncreaseError::Overflow)
    });
    methods.register("explode", |()| async move {
        if true {
            panic!("boom");
        }
        Ok::<_, RemoteError>(())
    });
    methods
}

#[tokio::test]
async fn remote_error() {
    crate::init();
    let (stub, serving) = serve(methods()).await;

    let value: u8 = stub.call("increase", (200, 50)).await.unwrap();
    assert_eq!(value, 250);

    let err = stub.call::<_, u8>("increase", (200, 100)).await.unwrap_err();
    println!("increase(200, 100): {}", &err);
    assert!(!err.is_communication());
    let remote = err.as_remote().unwrap();
    assert!(remote.is("Overflow"));
    assert_eq!(remote.args, vec![json!("value too large")]);

    serving.abort();
}

#[tokio::test]
async fn unknown_method() {
    crate::init();
    let (stub, serving) = serve(methods()).await;

    let err = stub.call::<_, ()>("decrease", (1, 2)).await.unwrap_err();
    println!("decrease(1, 2): {}", &err);
    let remote = err.as_remote().unwrap();
    assert!(remote.is(kind::UNKNOWN_METHOD));
    assert_eq!(remote.args, vec![json!("decrease")]);

    serving.abort();
}

#[tokio::test]
async fn invalid_arguments() {
    crate::init();
    let (stub, serving) = serve(methods()).await;

    println!("Wrong number of arguments");
    let err = stub.call::<_, u8>("increase", (1,)).await.unwrap_err();
    assert!(err.as_remote().unwrap().is(kind::INVALID_ARGUMENTS));

    println!("Wrong argument type");
    let err = stub.call::<_, u8>("increase", ("one", 2)).await.unwrap_err();
    assert!(err.as_remote().unwrap().is(kind::INVALID_ARGUMENTS));

    println!("Argument out of range");
    let err = stub.call::<_, u8>("increase", (1000, 2)).await.unwrap_err();
    assert!(err.as_remote().unwrap().is(kind::INVALID_ARGUMENTS));

    serving.abort();
}

#[tokio::test]
async fn panicking_method() {
    crate::init();
    let (stub, serving) = serve(methods()).await;

    let err = stub.call::<_, ()>("explode", ()).await.unwrap_err();
    println!("explode(): {}", &err);
    let remote = err.as_remote().unwrap();
    assert!(remote.is(kind::PANIC));
    assert_eq!(remote.args, vec![json!("boom")]);

    println!("Skeleton keeps serving");
    let value: u8 = stub.call("increase", (1, 2)).await.unwrap();
    assert_eq!(value, 3);

    serving.abort();
}

#[tokio::test]
async fn wrong_result_type() {
    crate::init();
    let (stub, serving) = serve(methods()).await;

    let err = stub.call::<_, String>("increase", (1, 2)).await.unwrap_err();
    println!("increase(1, 2) as string: {}", &err);
    assert!(matches!(err.as_communication(), Some(CommunicationError::Protocol(_))));

    serving.abort();
}

#[tokio::test]
async fn connection_refused() {
    crate::init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let stub = Stub::new(addr.into());
    let err = stub.call::<_, ()>("anything", ()).await.unwrap_err();
    println!("Calling closed port: {}", &err);
    assert!(matches!(err.as_communication(), Some(CommunicationError::Io(_))));
}

#[tokio::test]
async fn no_reply() {
    crate::init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stub = Stub::new(listener.local_addr().unwrap().into());
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        let request = lines.next_line().await.unwrap().unwrap();
        println!("Received request {} and closing", request);
    });

    let err = stub.call::<_, ()>("anything", ()).await.unwrap_err();
    println!("Call: {}", &err);
    assert!(matches!(err.as_communication(), Some(CommunicationError::NoReply)));

    server.await.unwrap();
}

#[tokio::test]
async fn malformed_reply() {
    crate::init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stub = Stub::new(listener.local_addr().unwrap().into());
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (rx, mut tx) = socket.into_split();
        let mut lines = BufReader::new(rx).lines();
        lines.next_line().await.unwrap().unwrap();
        tx.write_all(b"{\"answer\": 42}\n").await.unwrap();
    });

    let err = stub.call::<_, ()>("anything", ()).await.unwrap_err();
    println!("Call: {}", &err);
    assert!(matches!(err.as_communication(), Some(CommunicationError::Protocol(_))));

    server.await.unwrap();
}

#[tokio::test]
async fn timeout() {
    crate::init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: PeerAddress = listener.local_addr().unwrap().into();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let cfg = Cfg { call_timeout: Some(Duration::from_millis(200)), ..Default::default() };
    let stub = Stub::with_cfg(addr, cfg);
    let err = stub.call::<_, ()>("anything", ()).await.unwrap_err();
    println!("Call: {}", &err);
    assert!(matches!(err.as_communication(), Some(CommunicationError::Timeout)));

    server.abort();
}

async fn raw_request(stub: &Stub, line: &[u8]) -> Option<Value> {
    let addr = stub.address();
    let socket = TcpStream::connect((addr.host(), addr.port())).await.unwrap();
    let (rx, mut tx) = socket.into_split();
    tx.write_all(line).await.unwrap();
    let reply = BufReader::new(rx).lines().next_line().await.unwrap()?;
    println!("{} -> {}", String::from_utf8_lossy(line).trim_end(), &reply);
    Some(serde_json::from_str(&reply).unwrap())
}

#[tokio::test]
async fn malformed_request() {
    crate::init();
    let (stub, serving) = serve(methods()).await;

    let reply = raw_request(&stub, b"this is not json\n").await.unwrap();
    assert_eq!(reply["error"]["name"], json!(kind::PROTOCOL_ERROR));

    let reply = raw_request(&stub, b"{\"args\": [1, 2]}\n").await.unwrap();
    assert_eq!(reply["error"]["name"], json!(kind::PROTOCOL_ERROR));

    println!("Arguments may be omitted");
    let reply = raw_request(&stub, b"{\"method\": \"increase\"}\n").await.unwrap();
    assert_eq!(reply["error"]["name"], json!(kind::INVALID_ARGUMENTS));

    let reply = raw_request(&stub, b"{\"method\": \"increase\", \"args\": [1, 2]}\n").await.unwrap();
    assert_eq!(reply, json!({"result": 3}));

    serving.abort();
}

#[tokio::test]
async fn line_too_long() {
    crate::init();
    let cfg = Cfg { max_line_length: 64, ..Default::default() };
    let (stub, serving) = serve_with_cfg(methods(), cfg).await;

    let mut line = vec![b'x'; 100];
    line.push(b'\n');
    let reply = raw_request(&stub, &line).await.unwrap();
    assert_eq!(reply["error"]["name"], json!(kind::PROTOCOL_ERROR));

    println!("Skeleton keeps serving");
    let value: u8 = stub.call("increase", (1, 2)).await.unwrap();
    assert_eq!(value, 3);

    serving.abort();
}
