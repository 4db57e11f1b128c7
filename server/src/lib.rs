pub mod error;
pub mod framebuffer;
pub mod metrics;
pub mod server_state;

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use shared::{
    models::message::Message,
    networking::{
        error::NetworkingError, read_message, result::NetworkingResult, server::ServerConfig,
    },
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub use crate::error::{RouteError, ServerError};
pub use crate::framebuffer::{FrameBuffer, FrameBufferInfo, FrameKey, RenderBuffer, DEFAULT_AOV};
pub use crate::metrics::MetricsSnapshot;
pub use crate::server_state::{Direction, RouteOutcome, ServerState};

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Receives renders from any number of producers and keeps the resulting
/// FrameBuffers for a consumer to read.
pub struct Server {
    config: ServerConfig,
    state: Arc<ServerState>,
    running: Mutex<Option<Running>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(ServerState::new(&config));
        Self {
            config,
            state,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Binds `port` on the configured address and starts accepting
    /// producers. Port 0 picks a free port; the bound address is returned.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.config.address, port);
        let listener = start_server(&addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("Server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn(accept_loop(
            listener,
            Arc::clone(&self.state),
            shutdown.clone(),
            tasks.clone(),
        ));

        *running = Some(Running {
            local_addr,
            shutdown,
            tasks,
        });
        Ok(local_addr)
    }

    /// Stops accepting, closes every producer connection and waits for their
    /// tasks to finish. FrameBuffers are kept. Does nothing when stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(current) = running.take() else {
            return;
        };
        current.shutdown.cancel();
        current.tasks.close();
        current.tasks.wait().await;
        info!("Server on {} stopped", current.local_addr);
    }

    pub async fn attach(&self, port: u16) -> Result<SocketAddr, ServerError> {
        self.start(port).await
    }

    pub async fn detach(&self) {
        self.stop().await
    }

    /// Moves the listener to another port. Open connections are dropped,
    /// stored images are not.
    pub async fn change_port(&self, port: u16) -> Result<SocketAddr, ServerError> {
        self.stop().await;
        self.start(port).await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn snapshot(&self) -> Vec<Arc<FrameBuffer>> {
        self.state.snapshot()
    }

    pub fn select(&self, direction: Direction) -> Option<usize> {
        self.state.select(direction)
    }

    pub fn select_index(&self, index: usize) -> Option<usize> {
        self.state.select_index(index)
    }

    pub fn current_framebuffer(&self) -> Option<Arc<FrameBuffer>> {
        self.state.current_framebuffer()
    }

    pub fn find(&self, frame: f32, version: i32) -> Option<Arc<FrameBuffer>> {
        self.state.find(frame, version)
    }

    pub fn remove(&self, frame: f32, version: i32) -> Option<Arc<FrameBuffer>> {
        self.state.remove(frame, version)
    }

    pub fn clear(&self) {
        self.state.clear()
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity()
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.state.set_capacity(capacity)
    }

    pub fn evictions(&self) -> u64 {
        self.state.metrics().evictions()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics().snapshot()
    }
}

/// Server settings from the environment, before any command line overrides.
pub fn config_from_env() -> Result<ServerConfig, ServerError> {
    Ok(ServerConfig::from_env()?)
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.cancel();
        }
    }
}

async fn start_server(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            conn = listener.accept() => match conn {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        info!("Accepted connection from {}", peer);
        state.metrics().record_connection();
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            match handle_connection(socket, &state, &shutdown).await {
                Ok(()) => info!("Connection from {} closed", peer),
                Err(e) => error!("Connection from {} failed: {}", peer, e),
            }
        });
    }
    debug!("Accept loop stopped");
}

/// Reads frames until the producer goes away or the server stops.
/// Bad frames and unroutable messages are dropped one at a time.
async fn handle_connection(
    mut socket: TcpStream,
    state: &ServerState,
    shutdown: &CancellationToken,
) -> NetworkingResult<()> {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            message = read_message(&mut socket) => message,
        };

        match message {
            Ok(message) => route_message(state, &message),
            Err(NetworkingError::ConnectionLost) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!("Dropping malformed message: {}", e);
                state.metrics().record_dropped();
            }
            Err(e) => return Err(e),
        }
    }
}

fn route_message(state: &ServerState, message: &Message) {
    match state.route(message) {
        Ok(outcome) => trace!(
            "{} message for frame {} version {}: {:?}",
            message.kind(),
            message.frame(),
            message.version(),
            outcome
        ),
        Err(e) => warn!(
            "Dropping {} message for frame {} version {}: {}",
            message.kind(),
            message.frame(),
            message.version(),
            e
        ),
    }
}
