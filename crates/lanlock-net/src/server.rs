//! TCP server implementation

use lanlock_api::{ErrorCode, ErrorInfo, Event, Request, Response};
use lanlock_util::{ConnId, StudentId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{NetError, NetResult};

/// What a connection is entitled to receive.
///
/// Every connection starts unbound; `connect` binds it to a student
/// identity, `proctor_connect` to the proctor audience. Unbound connections
/// receive responses but no pushed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Unbound,
    Student(StudentId),
    Proctor,
}

/// Delivery scope of one pushed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every bound connection
    All,
    /// Proctor connections only
    Proctors,
    /// Exactly the connections bound to this student
    Student(StudentId),
}

impl Scope {
    fn matches(&self, audience: &Audience) -> bool {
        match (self, audience) {
            (_, Audience::Unbound) => false,
            (Scope::All, _) => true,
            (Scope::Proctors, Audience::Proctor) => true,
            (Scope::Student(id), Audience::Student(bound)) => id == bound,
            _ => false,
        }
    }
}

/// Message from a connection to the daemon loop
pub enum ServerMessage {
    Request { conn_id: ConnId, request: Request },
    Connected { conn_id: ConnId, addr: SocketAddr },
    Disconnected { conn_id: ConnId, audience: Audience },
}

/// TCP server
pub struct NetServer {
    bind_addr: SocketAddr,
    listener: Option<TcpListener>,
    clients: Arc<RwLock<HashMap<ConnId, ClientHandle>>>,
    event_tx: broadcast::Sender<(Scope, Event)>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    addr: SocketAddr,
    response_tx: mpsc::UnboundedSender<String>,
    audience: Audience,
}

impl NetServer {
    /// Create a new server for the given bind address
    pub fn new(bind_addr: SocketAddr) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            bind_addr,
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Start listening
    pub async fn start(&mut self) -> NetResult<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        // Resolve port 0 to the actual port
        self.bind_addr = listener.local_addr()?;

        info!(addr = %self.bind_addr, "Server listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// The address actually bound (differs from the requested one for port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> NetResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| NetError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let conn_id = ConnId::new();
                    info!(conn_id = %conn_id, addr = %addr, "Connection accepted");
                    self.handle_client(stream, conn_id, addr).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, conn_id: ConnId, addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        {
            let mut clients = self.clients.write().await;
            clients.insert(
                conn_id,
                ClientHandle {
                    addr,
                    response_tx: response_tx.clone(),
                    audience: Audience::Unbound,
                },
            );
        }

        let _ = self
            .message_tx
            .send(ServerMessage::Connected { conn_id, addr });

        // Reader task: parse NDJSON requests and forward them to the daemon
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(conn_id = %conn_id, "Connection closed (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                let _ = message_tx
                                    .send(ServerMessage::Request { conn_id, request });
                            }
                            Err(e) => {
                                warn!(conn_id = %conn_id, error = %e, "Unparseable request");
                                let response = Response::error(
                                    0,
                                    ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                                );
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = response_tx.send(json);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(conn_id = %conn_id, error = %e, "Read error");
                        break;
                    }
                }
            }
        });

        // Writer task: interleave responses with events this connection's
        // audience is entitled to see
        let mut event_rx = self.event_tx.subscribe();
        let clients_writer = self.clients.clone();
        let message_tx_writer = self.message_tx.clone();

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                tokio::select! {
                    response = response_rx.recv() => {
                        let Some(response) = response else { break };
                        let mut msg = response;
                        msg.push('\n');
                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                            debug!(conn_id = %conn_id, error = %e, "Write error");
                            break;
                        }
                    }

                    event = event_rx.recv() => {
                        let (scope, event) = match event {
                            Ok(pair) => pair,
                            // Fell behind the broadcast buffer; skip the gap
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(conn_id = %conn_id, skipped = n, "Event stream lagged");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        let entitled = {
                            let clients = clients_writer.read().await;
                            clients
                                .get(&conn_id)
                                .map(|h| scope.matches(&h.audience))
                                .unwrap_or(false)
                        };
                        if !entitled {
                            continue;
                        }

                        if let Ok(json) = serde_json::to_string(&event) {
                            let mut msg = json;
                            msg.push('\n');
                            if let Err(e) = writer.write_all(msg.as_bytes()).await {
                                debug!(conn_id = %conn_id, error = %e, "Event write error");
                                break;
                            }
                        }
                    }
                }
            }

            // Report the binding so the daemon can mark the student offline
            let audience = {
                let mut clients = clients_writer.write().await;
                clients
                    .remove(&conn_id)
                    .map(|h| h.audience)
                    .unwrap_or(Audience::Unbound)
            };
            let _ = message_tx_writer.send(ServerMessage::Disconnected { conn_id, audience });
        });
    }

    /// Bind a connection to a student identity
    pub async fn bind_student(&self, conn_id: &ConnId, id: StudentId) {
        let mut clients = self.clients.write().await;
        if let Some(handle) = clients.get_mut(conn_id) {
            handle.audience = Audience::Student(id);
        }
    }

    /// Bind a connection to the proctor audience
    pub async fn bind_proctor(&self, conn_id: &ConnId) {
        let mut clients = self.clients.write().await;
        if let Some(handle) = clients.get_mut(conn_id) {
            handle.audience = Audience::Proctor;
        }
    }

    /// Current binding of a connection
    pub async fn audience_of(&self, conn_id: &ConnId) -> Option<Audience> {
        let clients = self.clients.read().await;
        clients.get(conn_id).map(|h| h.audience.clone())
    }

    /// Peer address of a connection
    pub async fn peer_addr(&self, conn_id: &ConnId) -> Option<SocketAddr> {
        let clients = self.clients.read().await;
        clients.get(conn_id).map(|h| h.addr)
    }

    /// Send a response to a specific connection
    pub async fn send_response(&self, conn_id: &ConnId, response: Response) -> NetResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(conn_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| NetError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Push an event to every connection the scope covers
    pub fn push(&self, scope: Scope, event: Event) {
        let _ = self.event_tx.send((scope, event));
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
