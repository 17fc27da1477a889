//! mergeway web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Status and health endpoints
//! - Merge session API: compare, resolve hunks, preview, commit

pub mod api;
pub mod sessions;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use mergeway_core::config::AppConfig;
use mergeway_core::git::{ContentProvider, GitHubClient, MemoryRemote, ObjectStoreWriter};

use crate::sessions::SessionStore;

/// Read and write handles onto one remote, acting as one identity.
#[derive(Clone)]
pub struct RemoteHandles {
    pub reader: Arc<dyn ContentProvider>,
    pub writer: Arc<dyn ObjectStoreWriter>,
}

/// Builds remote handles for a request, optionally with the caller's token.
pub trait RemoteConnector: Send + Sync {
    /// `None` when no token is available for the request.
    fn connect(&self, token: Option<&str>) -> Option<RemoteHandles>;
}

/// Connects to GitHub, preferring the caller's token over the configured one.
pub struct GitHubConnector {
    client: GitHubClient,
    has_default_token: bool,
}

impl GitHubConnector {
    pub fn new(client: GitHubClient, has_default_token: bool) -> Self {
        Self {
            client,
            has_default_token,
        }
    }
}

impl RemoteConnector for GitHubConnector {
    fn connect(&self, token: Option<&str>) -> Option<RemoteHandles> {
        let client = match token {
            Some(token) => self.client.with_token(token),
            None if self.has_default_token => self.client.clone(),
            None => return None,
        };
        let client = Arc::new(client);
        Some(RemoteHandles {
            reader: client.clone(),
            writer: client,
        })
    }
}

/// Every request shares the same in-memory remote; tokens are ignored.
impl RemoteConnector for MemoryRemote {
    fn connect(&self, _token: Option<&str>) -> Option<RemoteHandles> {
        let remote = Arc::new(self.clone());
        Some(RemoteHandles {
            reader: remote.clone(),
            writer: remote,
        })
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub connector: Arc<dyn RemoteConnector>,
    /// Active merge sessions.
    pub sessions: SessionStore,
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server with the given dependencies.
    pub fn new(config: AppConfig, connector: Arc<dyn RemoteConnector>) -> Self {
        let sessions = SessionStore::new(config.limits.session_ttl_secs);
        let state = Arc::new(AppState {
            config,
            connector,
            sessions,
        });
        Self { state }
    }

    /// Shared state, for background tasks such as the session sweeper.
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// The full application router.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        Router::new()
            .merge(api::status::routes())
            .merge(api::sessions::routes())
            .layer(DefaultBodyLimit::max(8 * 1024 * 1024)) // custom hunk edits can be large
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Start the web server, listening on the given address until `shutdown`
    /// resolves.
    pub async fn start(
        self,
        listen_addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = self.router();

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
