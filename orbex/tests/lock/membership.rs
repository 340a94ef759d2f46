use orbex::{LockState, PeerId};
use std::{collections::BTreeSet, time::Duration};

use super::{start, tokens};
use crate::name_service::NameService;

#[tokio::test]
async fn join_and_leave() {
    crate::init();
    let ns = NameService::start().await;
    let n1 = start(&ns).await;
    let n2 = start(&ns).await;
    let n3 = start(&ns).await;

    assert_eq!(n1.peer_list().get_peers().await, BTreeSet::from([2, 3]));
    assert_eq!(n2.peer_list().get_peers().await, BTreeSet::from([1, 3]));
    assert_eq!(n3.peer_list().get_peers().await, BTreeSet::from([1, 2]));
    assert_eq!(n2.peer_list().owner().await, Some(2));
    assert_eq!(n2.peer_list().peer(3).await.unwrap().address(), n3.peer().address());
    assert!(n2.peer_list().peer(2).await.is_none());

    println!("Peer 2 leaves");
    n2.destroy().await.unwrap();
    assert_eq!(n1.peer_list().get_peers().await, BTreeSet::from([3]));
    assert_eq!(n3.peer_list().get_peers().await, BTreeSet::from([1]));
    assert!(n2.peer_list().get_peers().await.is_empty());

    let status = n1.lock().status().await;
    println!("Peer 1:\n{}", &status);
    assert_eq!(status.request.keys().copied().collect::<Vec<PeerId>>(), vec![1, 3]);
    assert_eq!(status.token.unwrap().peers().collect::<Vec<_>>(), vec![1, 3]);

    n3.destroy().await.unwrap();
    n1.destroy().await.unwrap();
}

#[tokio::test]
async fn register_unregister_restores_state() {
    crate::init();
    let ns = NameService::start().await;
    let n1 = start(&ns).await;
    let _n2 = start(&ns).await;

    let before = n1.lock().status().await;
    n1.lock().register_peer(42).await;
    let during = n1.lock().status().await;
    assert_eq!(during.request.get(&42), Some(&0));
    assert_eq!(during.token.as_ref().unwrap().get(42), 0);
    assert!(during.token.as_ref().unwrap().peers().any(|pid| pid == 42));

    n1.lock().unregister_peer(42).await;
    assert_eq!(n1.lock().status().await, before);

    println!("Registering a known peer keeps its entries");
    n1.lock().register_peer(2).await;
    assert_eq!(n1.lock().status().await, before);
}

#[tokio::test]
async fn destroy_passes_idle_token() {
    crate::init();
    let ns = NameService::start().await;
    let n1 = start(&ns).await;
    let n2 = start(&ns).await;
    let n3 = start(&ns).await;

    println!("Peer 1 leaves with idle token");
    assert_eq!(n1.lock().state().await, LockState::TokenPresent);
    n1.destroy().await.unwrap();
    assert_eq!(n1.lock().state().await, LockState::NoToken);

    let status = n2.lock().status().await;
    println!("Peer 2:\n{}", &status);
    assert_eq!(status.state, LockState::TokenPresent);
    assert_eq!(status.token.unwrap().peers().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(n3.lock().state().await, LockState::NoToken);
    assert_eq!(tokens(&[&n2, &n3]).await, 1);

    println!("Peer 3 acquires from peer 2");
    tokio::time::timeout(Duration::from_secs(10), n3.lock().acquire()).await.unwrap().unwrap();
    n3.lock().release().await.unwrap();

    n2.destroy().await.unwrap();
    n3.destroy().await.unwrap();
}

#[tokio::test]
async fn destroy_while_held() {
    crate::init();
    let ns = NameService::start().await;
    let n1 = start(&ns).await;
    let n2 = start(&ns).await;
    let n3 = start(&ns).await;

    n2.lock().acquire().await.unwrap();

    println!("Peer 3 waits for the token");
    let lock3 = n3.lock().clone();
    let waiting = tokio::spawn(async move { lock3.acquire().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(n3.lock().state().await, LockState::NoToken);

    println!("Peer 2 leaves while holding the token");
    n2.destroy().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), waiting).await.unwrap().unwrap().unwrap();
    assert_eq!(n3.lock().state().await, LockState::TokenHeld);
    assert_eq!(tokens(&[&n1, &n2, &n3]).await, 1);

    n3.lock().release().await.unwrap();
    n1.destroy().await.unwrap();
    n3.destroy().await.unwrap();
}

#[tokio::test]
async fn destroy_skips_unreachable_peer() {
    crate::init();
    let ns = NameService::start().await;
    let n1 = start(&ns).await;
    let n2 = start(&ns).await;
    let n3 = start(&ns).await;

    println!("Peer 2 becomes unreachable");
    n2.peer().shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("Peer 1 leaves with idle token");
    n1.destroy().await.unwrap();
    assert_eq!(n3.lock().state().await, LockState::TokenPresent);
    assert_eq!(n2.lock().state().await, LockState::NoToken);
    assert_eq!(tokens(&[&n1, &n2, &n3]).await, 1);

    println!("Peer 3 acquires despite unreachable peer 2");
    tokio::time::timeout(Duration::from_secs(10), n3.lock().acquire()).await.unwrap().unwrap();
    n3.lock().release().await.unwrap();
}
