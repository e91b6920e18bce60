//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! state change events to subscribed clients. Requests that need the
//! monitor or the state machine are forwarded to the main loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;

use super::protocol::{Command, CommandRequest, DaemonStatus, Notification, Request, Response};

/// Upper bound on a single message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    command_tx: mpsc::Sender<CommandRequest>,
    /// Source of per-client subscriptions
    event_tx: broadcast::Sender<StateEvent>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        status: DaemonStatus,
        command_tx: mpsc::Sender<CommandRequest>,
        event_tx: &broadcast::Sender<StateEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status,
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            command_tx,
            event_tx: event_tx.clone(),
        })
    }

    /// Fold a state event into the status snapshot
    pub async fn apply_event(&self, event: &StateEvent) {
        self.state.write().await.status.apply(event);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let client = Client {
                        state: Arc::clone(&self.state),
                        command_tx: self.command_tx.clone(),
                        event_tx: self.event_tx.clone(),
                    };
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = client.serve(stream) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// What woke a client handler
enum Input {
    Request(Option<Result<Request, String>>),
    Event(Result<StateEvent, RecvError>),
}

/// Per-connection handles
struct Client {
    state: Arc<RwLock<ServerState>>,
    command_tx: mpsc::Sender<CommandRequest>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl Client {
    /// Handle a single client connection.
    ///
    /// A reader task decodes requests so that pushed events can be written
    /// while the client is idle.
    async fn serve(self, stream: UnixStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel::<Result<Request, String>>(8);

        let reader_task = tokio::spawn(async move {
            loop {
                let body = match read_frame(&mut reader).await {
                    Ok(Some(body)) => body,
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "failed to read request");
                        break;
                    }
                };
                let request = serde_json::from_slice::<Request>(&body).map_err(|e| e.to_string());
                if request_tx.send(request).await.is_err() {
                    break;
                }
            }
        });

        let mut events: Option<broadcast::Receiver<StateEvent>> = None;
        let result = loop {
            let input = tokio::select! {
                request = request_rx.recv() => Input::Request(request),
                event = next_event(&mut events) => Input::Event(event),
            };

            let written = match input {
                Input::Request(None) => break Ok(()),
                Input::Request(Some(request)) => {
                    let response = match request {
                        Ok(Request::Subscribe) => {
                            debug!("client subscribed to notifications");
                            events = Some(self.event_tx.subscribe());
                            Response::Subscribed
                        }
                        Ok(request) => {
                            debug!(?request, "received request");
                            self.process_request(request).await
                        }
                        Err(message) => Response::error("bad_request", message),
                    };
                    write_frame(&mut writer, &response).await
                }
                Input::Event(Ok(event)) => {
                    write_frame(&mut writer, &Notification::Event { event }).await
                }
                Input::Event(Err(RecvError::Lagged(n))) => {
                    warn!(skipped = n, "subscriber lagged");
                    Ok(())
                }
                Input::Event(Err(RecvError::Closed)) => {
                    events = None;
                    Ok(())
                }
            };
            if let Err(e) = written {
                break Err(e);
            }
        };

        reader_task.abort();
        result
    }

    /// Process a request and return a response
    async fn process_request(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut state = self.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                Response::Status(state.status.clone())
            }

            Request::Subscribe => Response::Subscribed,

            request => match request.into_command() {
                Some(command) => forward(&self.command_tx, command).await,
                None => Response::error("bad_request", "unsupported request"),
            },
        }
    }
}

async fn forward(command_tx: &mpsc::Sender<CommandRequest>, command: Command) -> Response {
    let (reply, rx) = oneshot::channel();
    if command_tx.send(CommandRequest { command, reply }).await.is_err() {
        return Response::error("unavailable", "daemon is shutting down");
    }
    rx.await
        .unwrap_or_else(|_| Response::error("unavailable", "command dropped"))
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<StateEvent>>,
) -> Result<StateEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed message body; `None` on clean EOF
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    // Read message length (4-byte little-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large: {} bytes", len);
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
