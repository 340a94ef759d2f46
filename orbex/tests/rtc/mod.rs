use orbex::{Cfg, Dispatcher, Skeleton, Stub};
use tokio::task::JoinHandle;

mod errors;

pub async fn serve(methods: Dispatcher) -> (Stub, JoinHandle<()>) {
    serve_with_cfg(methods, Cfg::default()).await
}

pub async fn serve_with_cfg(methods: Dispatcher, cfg: Cfg) -> (Stub, JoinHandle<()>) {
    let skeleton = Skeleton::bind("127.0.0.1:0", methods, cfg.clone()).await.unwrap();
    let addr = skeleton.local_addr().unwrap();
    println!("Skeleton listening on {}", addr);
    (Stub::with_cfg(addr.into(), cfg), skeleton.spawn())
}
