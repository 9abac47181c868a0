//! IPC server implementation

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timelock_api::{ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response};
use timelock_util::ClientId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Message from a client connection to the service loop
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// IPC server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self::with_event_capacity(socket_path, DEFAULT_EVENT_CAPACITY)
    }

    /// Events beyond `capacity` not yet written to a slow client are dropped for it
    pub fn with_event_capacity(socket_path: impl AsRef<Path>, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Take the receiver for client messages. Available once.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections until the listener fails
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid, nix::unistd::getuid().as_raw());

                    let mut info = ClientInfo::new(role);
                    info.client_id = client_id.clone();
                    if let Some(u) = uid {
                        info = info.with_uid(u);
                    }

                    info!(client_id = %client_id, uid = ?uid, role = ?role, "Client connected");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        {
            let mut clients = self.clients.write().await;
            clients.insert(
                client_id.clone(),
                ClientHandle {
                    info: info.clone(),
                    response_tx: response_tx.clone(),
                    subscribed: false,
                },
            );
        }

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        // Reader: parse requests, track subscription, report disconnect
        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let reader_id = client_id.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                let subscribed = match request.command {
                                    Command::SubscribeEvents => Some(true),
                                    Command::UnsubscribeEvents => Some(false),
                                    _ => None,
                                };
                                if let Some(subscribed) = subscribed {
                                    let mut clients = clients.write().await;
                                    if let Some(handle) = clients.get_mut(&reader_id) {
                                        handle.subscribed = subscribed;
                                    }
                                }

                                let _ = message_tx.send(ServerMessage::Request {
                                    client_id: reader_id.clone(),
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Invalid request");
                                let response = Response::error(
                                    0,
                                    ErrorInfo::new(
                                        ErrorCode::InvalidRequest,
                                        format!("Malformed request: {}", e),
                                    ),
                                );
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = response_tx.send(json);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }

            // Dropping the last sender lets the writer finish
            clients.write().await.remove(&reader_id);
            drop(response_tx);

            let _ = message_tx.send(ServerMessage::ClientDisconnected {
                client_id: reader_id,
            });
        });

        // Writer: responses plus events for subscribed clients
        let mut event_rx = self.event_tx.subscribe();
        let clients = self.clients.clone();
        let writer_id = client_id;

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                let message = tokio::select! {
                    response = response_rx.recv() => match response {
                        Some(response) => response,
                        None => break,
                    },

                    event = event_rx.recv() => match event {
                        Ok(event) => {
                            let subscribed = clients
                                .read()
                                .await
                                .get(&writer_id)
                                .is_some_and(|h| h.subscribed);
                            if !subscribed {
                                continue;
                            }
                            match serde_json::to_string(&event) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Failed to encode event");
                                    continue;
                                }
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(client_id = %writer_id, missed, "Client fell behind, events dropped");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                let mut msg = message;
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(client_id = %writer_id, error = %e, "Write error");
                    break;
                }
            }

            debug!(client_id = %writer_id, "Writer finished");
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|h| h.subscribed)
            .count()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Root and the daemon's own user may publish and report; everyone else
/// connected through the socket is a shell.
pub fn role_for_uid(peer_uid: Option<u32>, own_uid: u32) -> ClientRole {
    match peer_uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == own_uid => ClientRole::Admin,
        Some(_) => ClientRole::Shell,
        None => ClientRole::Observer,
    }
}

fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use std::time::Duration;
    use tempfile::tempdir;
    use timelock_api::{EventPayload, ResponsePayload, ResponseResult};

    /// Answer every request with Pong until the channel closes
    fn spawn_pong_loop(server: Arc<IpcServer>, mut rx: mpsc::UnboundedReceiver<ServerMessage>) {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let ServerMessage::Request { client_id, request } = msg {
                    let payload = match request.command {
                        Command::SubscribeEvents => ResponsePayload::Subscribed {
                            client_id: client_id.clone(),
                        },
                        _ => ResponsePayload::Pong,
                    };
                    let _ = server
                        .send_response(&client_id, Response::success(request.request_id, payload))
                        .await;
                }
            }
        });
    }

    async fn started_server(dir: &Path) -> Arc<IpcServer> {
        let mut server = IpcServer::new(dir.join("test.sock"));
        server.start().await.unwrap();
        let server = Arc::new(server);

        let rx = server.take_message_receiver().await.unwrap();
        spawn_pong_loop(server.clone(), rx);

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });
        server
    }

    #[tokio::test]
    async fn server_start_creates_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        assert!(server.take_message_receiver().await.is_some());
        assert!(server.take_message_receiver().await.is_none());
    }

    #[tokio::test]
    async fn request_response_round_trip() {
        let dir = tempdir().unwrap();
        let server = started_server(dir.path()).await;

        let mut client = IpcClient::connect(server.socket_path()).await.unwrap();
        let payload = client.request(Command::Ping).await.unwrap();
        assert!(matches!(payload, ResponsePayload::Pong));

        // Same user as the test process
        assert_eq!(server.client_count().await, 1);
    }

    #[tokio::test]
    async fn malformed_line_gets_error_response() {
        let dir = tempdir().unwrap();
        let server = started_server(dir.path()).await;

        let stream = UnixStream::connect(server.socket_path()).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"{not json}\n").await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        let response: Response = serde_json::from_str(line.trim()).unwrap();
        match response.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::InvalidRequest),
            ResponseResult::Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn only_subscribers_receive_events() {
        let dir = tempdir().unwrap();
        let server = started_server(dir.path()).await;

        let mut quiet = IpcClient::connect(server.socket_path()).await.unwrap();
        let mut stream = IpcClient::connect(server.socket_path())
            .await
            .unwrap()
            .subscribe()
            .await
            .unwrap();
        assert_eq!(server.subscriber_count().await, 1);

        server.broadcast_event(Event::new(EventPayload::Recovered));

        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.payload, EventPayload::Recovered));

        // The unsubscribed client sees only its own response
        let payload = quiet.request(Command::Ping).await.unwrap();
        assert!(matches!(payload, ResponsePayload::Pong));
    }

    #[tokio::test]
    async fn disconnect_removes_client() {
        let dir = tempdir().unwrap();
        let server = started_server(dir.path()).await;

        let mut client = IpcClient::connect(server.socket_path()).await.unwrap();
        client.request(Command::Ping).await.unwrap();
        drop(client);

        for _ in 0..50 {
            if server.client_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("client was not removed after disconnect");
    }

    #[test]
    fn roles_by_uid() {
        assert_eq!(role_for_uid(Some(0), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1000), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1001), 1000), ClientRole::Shell);
        assert_eq!(role_for_uid(None, 1000), ClientRole::Observer);
    }
}
