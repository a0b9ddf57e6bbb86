//! Test server harness for HTTP tests.
//!
//! Provides `TestRoomServer` for spawning a real room behind the real router.

use room_service::config::Config;
use room_service::room::{Collaborators, Room};
use room_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Build a test [`Config`] from `ROOM_*` overrides.
pub fn test_config(vars: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
    let mut map = HashMap::from([("ROOM_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string())]);
    for (key, value) in vars {
        map.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&map).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))
}

/// Test harness for spawning the listening room in tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_banned_words_round_trip() -> anyhow::Result<()> {
///     let server = TestRoomServer::spawn_with(&[("ROOM_BANNED_WORDS", "spam")], None).await?;
///
///     let body: serde_json::Value = reqwest::get(format!("{}/v1/admin/banned-words", server.url()))
///         .await?
///         .json()
///         .await?;
///
///     assert_eq!(body["words"][0], "spam");
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    config: Config,
    state: Arc<AppState>,
    shutdown_token: CancellationToken,
    _handle: JoinHandle<()>,
    _clock: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn a room with default configuration and in-memory collaborators.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[], None).await
    }

    /// Spawn a room with `ROOM_*` overrides and, optionally, custom
    /// collaborators.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the clock task and the HTTP server in the background
    pub async fn spawn_with(
        vars: &[(&str, &str)],
        collaborators: Option<Collaborators>,
    ) -> Result<Self, anyhow::Error> {
        let config = test_config(vars)?;
        let collaborators = collaborators.unwrap_or_else(|| Collaborators::from_config(&config));
        let shutdown_token = CancellationToken::new();

        let room = Room::build(&config, collaborators, shutdown_token.clone())
            .map_err(|e| anyhow::anyhow!("Failed to build room: {}", e))?;
        let (state, clock) = room.start();

        // Build routes using the service's real route builder
        let app = routes::build_routes(Arc::clone(&state), config.cors_allow_any_origin);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_token = shutdown_token.child_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            state,
            shutdown_token,
            _handle: handle,
            _clock: clock,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared state behind the router.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        self._handle.abort();
        self._clock.abort();
    }
}
