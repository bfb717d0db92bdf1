use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use presence::InMemoryDirectory;

use crate::AppState;

/// Fresh state backed by an empty in-memory directory.
pub fn test_app_state() -> AppState {
    AppState::new(Arc::new(InMemoryDirectory::new()))
}

/// Serve the full router on an ephemeral loopback port.
///
/// Cancel the returned token to stop the server.
pub async fn spawn_test_server() -> (SocketAddr, AppState, CancellationToken) {
    let state = test_app_state();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let cancel = CancellationToken::new();
    tokio::spawn(crate::serve(listener, state.clone(), cancel.clone()));
    (addr, state, cancel)
}
