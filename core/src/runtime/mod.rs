//! Tokio runtime for the sync engine
//!
//! [`SyncRuntime::spawn`] moves a [`ConnectionManager`] onto a task that owns
//! it outright. Callers talk to it through a cloneable [`SyncHandle`];
//! the WebSocket transport and the timers talk to it through an event
//! channel. Every command and event is handled to completion before the
//! next, so the manager never sees concurrent access.

pub mod scheduler;
pub mod websocket;

pub use scheduler::TokioScheduler;
pub use websocket::{session_url, WebSocketTransport};

use crate::action::{Action, Dispatcher, StateSource};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connection::{CloseInfo, ConnectionManager, ConnectionStatus, Timer};
use crate::error::{Result, SyncError};
use crate::protocol::ClientMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What the connection task reports
#[derive(Debug)]
pub enum TransportEvent {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Closed { generation: u64, info: CloseInfo },
}

#[derive(Debug)]
pub enum RuntimeEvent {
    Transport(TransportEvent),
    Timer { timer: Timer, generation: u64 },
}

/// Commands sent from handles to the engine task
pub enum SyncCommand {
    Connect {
        session_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Retry {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        message: ClientMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    SendAction {
        action: Action,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<ConnectionStatus>,
    },
    Subscribe {
        listener: mpsc::UnboundedSender<ConnectionStatus>,
    },
    Shutdown,
}

type Manager<D> = ConnectionManager<WebSocketTransport, TokioScheduler, D>;

/// Builder for the engine task
pub struct SyncRuntime {
    server_url: String,
    config: SyncConfig,
    state_source: Option<Box<dyn StateSource>>,
    clock: Arc<dyn Clock>,
}

impl SyncRuntime {
    /// `server_url` is the sessions endpoint, e.g. `ws://host/api/sessions`
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            config: SyncConfig::default(),
            state_source: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_state_source(mut self, source: Box<dyn StateSource>) -> Self {
        self.state_source = Some(source);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the engine task. Must be called inside a tokio runtime.
    pub fn spawn<D>(self, dispatcher: D) -> Result<SyncHandle>
    where
        D: Dispatcher + 'static,
    {
        self.config.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(64);

        let transport = WebSocketTransport::new(self.server_url, event_tx.clone());
        let scheduler = TokioScheduler::new(event_tx);
        let mut manager =
            ConnectionManager::new(self.config, transport, scheduler, dispatcher, self.clock);
        if let Some(source) = self.state_source {
            manager = manager.with_state_source(source);
        }

        let task = tokio::spawn(run_engine(manager, command_rx, event_rx));
        Ok(SyncHandle {
            command_tx,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        })
    }
}

async fn run_engine<D: Dispatcher>(
    mut manager: Manager<D>,
    mut commands: mpsc::Receiver<SyncCommand>,
    mut events: mpsc::UnboundedReceiver<RuntimeEvent>,
) {
    info!("Sync engine started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SyncCommand::Shutdown) | None => break,
                Some(command) => handle_command(&mut manager, command),
            },
            Some(event) = events.recv() => handle_event(&mut manager, event),
        }
    }
    manager.disconnect();
    info!("Sync engine stopped");
}

fn handle_command<D: Dispatcher>(manager: &mut Manager<D>, command: SyncCommand) {
    match command {
        SyncCommand::Connect { session_id, reply } => {
            let _ = reply.send(manager.connect(&session_id));
        }
        SyncCommand::Disconnect { reply } => {
            manager.disconnect();
            let _ = reply.send(());
        }
        SyncCommand::Retry { reply } => {
            let _ = reply.send(manager.retry_connection());
        }
        SyncCommand::Send { message, reply } => {
            let _ = reply.send(manager.send(message));
        }
        SyncCommand::SendAction { action, reply } => {
            let _ = reply.send(manager.send_action(&action));
        }
        SyncCommand::Status { reply } => {
            let _ = reply.send(manager.status());
        }
        SyncCommand::Subscribe { listener } => {
            let _ = listener.send(manager.status());
            manager.subscribe(Box::new(move |status| {
                let _ = listener.send(status.clone());
            }));
        }
        SyncCommand::Shutdown => {}
    }
}

fn handle_event<D: Dispatcher>(manager: &mut Manager<D>, event: RuntimeEvent) {
    match event {
        RuntimeEvent::Transport(TransportEvent::Opened { generation }) => {
            manager.handle_open(generation)
        }
        RuntimeEvent::Transport(TransportEvent::Frame { generation, text }) => {
            manager.handle_frame(generation, &text)
        }
        RuntimeEvent::Transport(TransportEvent::Closed { generation, info }) => {
            debug!("Transport closed (generation {}): {:?}", generation, info);
            manager.handle_close(generation, info)
        }
        RuntimeEvent::Timer { timer, generation } => manager.handle_timer(timer, generation),
    }
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl SyncHandle {
    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> SyncCommand) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| SyncError::Closed)?;
        reply_rx.await.map_err(|_| SyncError::Closed)
    }

    pub async fn connect(&self, session_id: impl Into<String>) -> Result<()> {
        let session_id = session_id.into();
        self.request(|reply| SyncCommand::Connect { session_id, reply })
            .await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| SyncCommand::Disconnect { reply }).await
    }

    pub async fn retry_connection(&self) -> Result<()> {
        self.request(|reply| SyncCommand::Retry { reply }).await?
    }

    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        self.request(|reply| SyncCommand::Send { message, reply })
            .await?
    }

    pub async fn send_action(&self, action: Action) -> Result<()> {
        self.request(|reply| SyncCommand::SendAction { action, reply })
            .await?
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        self.request(|reply| SyncCommand::Status { reply }).await
    }

    /// Status updates, starting with the current status
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ConnectionStatus>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.command_tx
            .send(SyncCommand::Subscribe { listener: tx })
            .await
            .map_err(|_| SyncError::Closed)?;
        Ok(rx)
    }

    /// Disconnect and stop the engine task, waiting for it to finish
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(|e| SyncError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::PresenceEvent;
    use crate::connection::ConnectionState;

    struct NullDispatcher;

    impl Dispatcher for NullDispatcher {
        fn dispatch(&mut self, _action: Action) {}
        fn presence(&mut self, _event: PresenceEvent) {}
    }

    #[tokio::test]
    async fn test_status_before_connect() {
        let handle = SyncRuntime::new("ws://127.0.0.1:1")
            .spawn(NullDispatcher)
            .unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.reconnect_attempts, 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_closed() {
        let handle = SyncRuntime::new("ws://127.0.0.1:1")
            .spawn(NullDispatcher)
            .unwrap();
        handle.shutdown().await.unwrap();
        assert!(!handle.is_running());
        assert!(matches!(handle.status().await, Err(SyncError::Closed)));
        assert!(matches!(
            handle.connect("abc").await,
            Err(SyncError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_retry_requires_degraded() {
        let handle = SyncRuntime::new("ws://127.0.0.1:1")
            .spawn(NullDispatcher)
            .unwrap();
        assert!(matches!(
            handle.retry_connection().await,
            Err(SyncError::InvalidState { .. })
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = SyncConfig::default();
        config.outbox.capacity = 0;
        let result = SyncRuntime::new("ws://127.0.0.1:1")
            .with_config(config)
            .spawn(NullDispatcher);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_subscribe_receives_current_status() {
        let handle = SyncRuntime::new("ws://127.0.0.1:1")
            .spawn(NullDispatcher)
            .unwrap();
        let mut updates = handle.subscribe().await.unwrap();
        let first = updates.recv().await.unwrap();
        assert_eq!(first.state, ConnectionState::Disconnected);
        handle.shutdown().await.unwrap();
    }
}
