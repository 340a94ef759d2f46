use orbex::{LockError, LockState, Stub, Token};
use serde_json::json;

use super::{bind, start};
use crate::name_service::NameService;

#[tokio::test]
async fn not_initialized() {
    crate::init();
    let ns = NameService::start().await;
    let node = bind(&ns).await;

    assert_eq!(node.lock().acquire().await, Err(LockError::NotInitialized));
    assert_eq!(node.lock().release().await, Err(LockError::NotInitialized));
    assert_eq!(node.lock().initialize().await, Err(LockError::NotInitialized));
}

#[tokio::test]
async fn reentrant_and_not_held() {
    crate::init();
    let ns = NameService::start().await;
    let node = start(&ns).await;

    assert_eq!(node.lock().release().await, Err(LockError::NotHeld));

    node.lock().acquire().await.unwrap();
    assert_eq!(node.lock().acquire().await, Err(LockError::Reentrant));
    assert_eq!(node.lock().state().await, LockState::TokenHeld);

    node.lock().release().await.unwrap();
    assert_eq!(node.lock().release().await, Err(LockError::NotHeld));
    assert_eq!(node.lock().state().await, LockState::TokenPresent);

    node.destroy().await.unwrap();
}

#[tokio::test]
async fn remote_errors() {
    crate::init();
    let ns = NameService::start().await;
    let node = start(&ns).await;
    let stub = Stub::new(node.peer().address().clone());

    println!("Request from unknown peer");
    let err = stub.call::<_, ()>("request_token", (1, 99)).await.unwrap_err();
    println!("{}", &err);
    let remote = err.as_remote().unwrap();
    assert!(remote.is("UnknownPeer"));
    assert_eq!(remote.args, vec![json!(99)]);

    println!("Malformed token");
    let err = stub.call::<_, ()>("obtain_token", (json!({"1": 0}),)).await.unwrap_err();
    assert!(err.as_remote().unwrap().is(orbex::rtc::kind::INVALID_ARGUMENTS));

    println!("Lock state is unaffected");
    let status = node.lock().status().await;
    assert_eq!(status.state, LockState::TokenPresent);
    assert_eq!(status.token, Some(Token::new([1])));

    node.destroy().await.unwrap();
}
