use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::command::ClientCommand;
use crate::event::ServerEvent;
use crate::platform::Platform;
use crate::services::EventSink;

/// Event sink that fans every lobby-addressed event out to the
/// connections subscribed to that lobby. Sends never block; closed
/// subscribers are pruned on the next emission.
#[derive(Default)]
pub struct BroadcastSink {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<ServerEvent>>>>,
}

impl BroadcastSink {
    pub fn new() -> BroadcastSink {
        BroadcastSink::default()
    }

    /// Subscribe a connection to a lobby's broadcast group.
    pub fn subscribe(&self, lobby_code: &str, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.subscribers
            .lock()
            .unwrap()
            .entry(lobby_code.to_string())
            .or_default()
            .push(tx);
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, lobby_code: &str, event: ServerEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(group) = subscribers.get_mut(lobby_code) {
            group.retain(|tx| tx.send(event.clone()).is_ok());
            if group.is_empty() {
                subscribers.remove(lobby_code);
            }
        }
    }
}

/// Accept loop of the line-delimited JSON TCP transport: one command
/// object per inbound line, one event object per outbound line.
pub async fn serve(
    platform: Arc<Platform>,
    sink: Arc<BroadcastSink>,
    bind_address: &str,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    log::info!("listening on {}", bind_address);
    loop {
        let (socket, addr) = listener.accept().await?;
        log::debug!("connection from {}", addr);
        let platform = platform.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            handle_connection(platform, sink, socket, addr).await;
        });
    }
}

async fn handle_connection(
    platform: Arc<Platform>,
    sink: Arc<BroadcastSink>,
    socket: TcpStream,
    addr: SocketAddr,
) {
    let (reader, writer) = socket.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();
    let write_task = tokio::spawn(write_loop(writer, rx));

    let _ = tx.send(ServerEvent::Connected {
        motd: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
    });

    // The lobby and player this connection authenticated as, learned
    // from its join command; used for the transport-driven disconnect.
    let mut identity: Option<(String, String)> = None;

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                log::debug!("read error from {}: {}", addr, err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command: ClientCommand = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(err) => {
                let _ = tx.send(ServerEvent::Error {
                    code: "INTERNAL".to_string(),
                    message: format!("malformed message: {}", err),
                });
                continue;
            }
        };

        let joining = match &command {
            ClientCommand::JoinLobby { lobby_code, player } => {
                Some((lobby_code.clone(), player.id.clone()))
            }
            _ => None,
        };

        let replies = platform.handle(command).await;
        let joined = replies
            .iter()
            .any(|ev| matches!(ev, ServerEvent::JoinSuccess { .. }));
        for reply in replies {
            let _ = tx.send(reply);
        }

        if joined {
            if let Some((lobby_code, player_id)) = joining {
                sink.subscribe(&lobby_code, tx.clone());
                identity = Some((lobby_code, player_id));
            }
        }
    }

    if let Some((lobby_code, player_id)) = identity {
        platform.on_client_disconnect(&lobby_code, &player_id).await;
    }
    drop(tx);
    let _ = write_task.await;
    log::debug!("connection {} closed", addr);
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<ServerEvent>) {
    while let Some(event) = rx.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(err) => {
                log::error!("failed to serialize {}: {}", event.tag(), err);
                continue;
            }
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() {
            return;
        }
    }
}
