//! The `--reload` callback against a live control endpoint, the way the
//! finder binding and the watcher invoke it.

use std::process::Command;

use tokio::sync::broadcast;

use tuick_session::control::ControlEndpoint;
use tuick_session::{ReloadToken, RELOAD_KEY_ENV, RELOAD_PORT_ENV};

#[tokio::test]
async fn reload_callback_posts_to_the_endpoint() {
    let token = ReloadToken::generate();
    let (shutdown_tx, _) = broadcast::channel(1);
    let (endpoint, mut reload_rx) = ControlEndpoint::bind(token.clone(), shutdown_tx.subscribe())
        .await
        .expect("bind endpoint");
    let port = endpoint.port();

    let key = token.as_str().to_owned();
    let status = tokio::task::spawn_blocking(move || {
        Command::new(env!("CARGO_BIN_EXE_tuick"))
            .arg("--reload")
            .env(RELOAD_PORT_ENV, port.to_string())
            .env(RELOAD_KEY_ENV, key)
            .status()
            .expect("run tuick --reload")
    })
    .await
    .expect("join");
    assert!(status.success());

    reload_rx.recv().await.expect("reload event queued");
    endpoint.close().await;
}

#[tokio::test]
async fn reload_callback_with_wrong_key_is_rejected() {
    let token = ReloadToken::generate();
    let (shutdown_tx, _) = broadcast::channel(1);
    let (endpoint, mut reload_rx) = ControlEndpoint::bind(token, shutdown_tx.subscribe())
        .await
        .expect("bind endpoint");
    let port = endpoint.port();

    let status = tokio::task::spawn_blocking(move || {
        Command::new(env!("CARGO_BIN_EXE_tuick"))
            .arg("--reload")
            .env(RELOAD_PORT_ENV, port.to_string())
            .env(RELOAD_KEY_ENV, "wrong-key")
            .status()
            .expect("run tuick --reload")
    })
    .await
    .expect("join");
    assert!(!status.success());
    assert!(reload_rx.try_recv().is_err(), "no event for a bad key");
    endpoint.close().await;
}
