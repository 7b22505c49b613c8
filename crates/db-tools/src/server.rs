use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::CoreResult;
use crate::tools::Coordinator;

pub mod error;
pub mod guard;
pub mod invoke;
pub mod openapi;

/// Running HTTP listener. Dropping the handle shuts the server down without
/// waiting; [`Server::shutdown_gracefully`] also waits for in-flight requests.
pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    mount_path: String,
}

impl Server {
    /// Bind `config.host:config.port` and start serving in the background.
    pub async fn start(config: &ServerConfig, coordinator: Arc<Coordinator>) -> CoreResult<Self> {
        let state = Arc::new(ServerState {
            coordinator,
            allowed_hosts: config.allowed_hosts.clone(),
            mount_path: config.path.clone(),
        });
        let app = router(state, &config.allowed_origins);

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(error) = result {
                tracing::error!(%error, "server terminated");
            }
        });

        Ok(Server {
            addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            mount_path: config.path.clone(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    /// Full URL of a route under the mount path, e.g. `url("/health")`.
    pub fn url(&self, route: &str) -> String {
        let base = if self.mount_path == "/" { "" } else { self.mount_path.as_str() };
        format!("http://{}{}{}", self.addr, base, route)
    }

    pub fn shutdown(&mut self) -> Result<(), String> {
        if let Some(sender) = self.shutdown.take() {
            sender
                .send(())
                .map_err(|_| "failed to send server shutdown signal".to_string())
        } else {
            Ok(())
        }
    }

    /// Stop accepting connections and wait until every open connection has
    /// delivered its response.
    pub async fn shutdown_gracefully(mut self) {
        let _ = self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::error!(%error, "server task failed");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

pub(crate) struct ServerState {
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) allowed_hosts: Vec<String>,
    pub(crate) mount_path: String,
}

fn router(state: Arc<ServerState>, allowed_origins: &[String]) -> Router {
    let routes = Router::new()
        .route("/health", get(invoke::health))
        .route("/tools", get(invoke::list_tools))
        .route("/tools/:name", post(invoke::invoke_named))
        .route("/invoke", post(invoke::invoke))
        .route("/openapi.json", get(openapi::openapi_json));

    let app = if state.mount_path == "/" {
        routes
    } else {
        Router::new().nest(&state.mount_path, routes)
    };

    app.layer(middleware::from_fn_with_state(state.clone(), guard::check_host))
        .with_state(state)
        .layer(guard::cors_layer(allowed_origins))
}
