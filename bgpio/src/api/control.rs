//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

//! Unix-socket control server.
//!
//! Speaks the same line protocol as the helper channel, with a session
//! handshake on top: clients introduce themselves with `session ping`, the
//! newest client (by start timestamp) preempts older ones, and responses
//! are routed back to the issuing client through a request-id.

use std::collections::HashMap;
use std::path::PathBuf;

use bgpio_utils::task::Task;
use bgpio_utils::{Sender, UnboundedSender};
use tokio::sync::mpsc;

use crate::api::{ApiEvent, ApiRequest, ApiResponse, encoder};
use crate::debug::Debug;
use crate::error::IoError;

// Per-client bounded write queue; writes block once it fills up.
const CLIENT_WRITE_QUEUE: usize = 1024;

// A line received from a client, or its disconnection.
#[derive(Debug)]
struct ClientLine {
    client_id: u64,
    line: Option<String>,
}

#[derive(Debug)]
struct Client {
    uuid: Option<String>,
    start_ts: Option<u64>,
    ack: bool,
    writer_tx: Sender<String>,
    _writer_task: Task<()>,
    _reader_task: Task<()>,
}

// Routes responses back to the client that issued the request.
#[derive(Debug, Default)]
struct ResponseRouter {
    pending: HashMap<String, u64>,
}

// ===== global functions =====

// Spawns the control-socket server task.
pub(crate) fn server(
    path: PathBuf,
    api_request_tx: UnboundedSender<ApiRequest>,
    api_event_rx: bgpio_utils::UnboundedReceiver<ApiEvent>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        Task::spawn(async move {
            server_loop(path, api_request_tx, api_event_rx).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

#[cfg(not(feature = "testing"))]
async fn server_loop(
    path: PathBuf,
    api_request_tx: UnboundedSender<ApiRequest>,
    mut api_event_rx: bgpio_utils::UnboundedReceiver<ApiEvent>,
) {
    use rand::Rng;
    use tokio::net::UnixListener;

    // Replace any stale socket file.
    let _ = std::fs::remove_file(&path);
    let listener = match UnixListener::bind(&path) {
        Ok(listener) => listener,
        Err(error) => {
            IoError::UnixSocketError(error).log();
            return;
        }
    };

    let daemon_uuid = format!("{:032x}", rand::rng().random::<u128>());
    let mut clients: HashMap<u64, Client> = HashMap::new();
    let mut router = ResponseRouter::default();
    let mut next_client_id: u64 = 1;
    let mut next_request_id: u64 = 1;
    let mut newest_ts: u64 = 0;

    let (client_linep, mut client_linec) = mpsc::channel::<ClientLine>(64);
    let (responsep, mut responsec) =
        mpsc::unbounded_channel::<ApiResponse>();

    loop {
        tokio::select! {
            // New client connection.
            result = listener.accept() => {
                let Ok((stream, _)) = result else { continue };
                let client_id = next_client_id;
                next_client_id += 1;
                let client =
                    client_setup(client_id, stream, client_linep.clone());
                clients.insert(client_id, client);
                Debug::ApiClientConnect(&client_id.to_string()).log();
            }
            // Line received from a client.
            line = client_linec.recv() => {
                let Some(ClientLine { client_id, line }) = line else {
                    break;
                };
                let Some(line) = line else {
                    // Client disconnected.
                    clients.remove(&client_id);
                    router.pending.retain(|_, id| *id != client_id);
                    Debug::ApiClientDisconnect(&client_id.to_string())
                        .log();
                    continue;
                };
                let Some(client) = clients.get_mut(&client_id) else {
                    continue;
                };

                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }

                // Session-level handshake commands are answered locally.
                if let Some(rest) = line.strip_prefix("session ping ") {
                    let mut words = rest.split_whitespace();
                    client.uuid =
                        words.next().map(|uuid| uuid.to_string());
                    client.start_ts = words
                        .next()
                        .and_then(|ts| ts.parse::<u64>().ok());

                    // The newest client preempts every older one.
                    let ts = client.start_ts.unwrap_or(0);
                    let active = ts >= newest_ts;
                    if active {
                        newest_ts = ts;
                    }

                    let request_id = format!("r{}", next_request_id);
                    next_request_id += 1;
                    let pong = format!(
                        "pong {} active={} request_id={}",
                        daemon_uuid, active, request_id
                    );
                    let _ = client.writer_tx.send(pong).await;
                    let _ =
                        client.writer_tx.send("done".to_string()).await;
                    continue;
                }
                if line == "session ack enable" {
                    client.ack = true;
                    let _ =
                        client.writer_tx.send("done".to_string()).await;
                    continue;
                }

                // Forward the command to the instance.
                let request_id = format!("r{}", next_request_id);
                next_request_id += 1;
                router.pending.insert(request_id.clone(), client_id);
                let request = ApiRequest {
                    client_id,
                    request_id: Some(request_id),
                    line,
                    reply_tx: responsep.clone(),
                };
                let _ = api_request_tx.send(request);
            }
            // Response from the instance.
            response = responsec.recv() => {
                let Some(response) = response else { break };

                // Route by request-id when present, falling back to the
                // client recorded in the response itself.
                let client_id = response
                    .request_id
                    .as_ref()
                    .and_then(|id| router.pending.remove(id))
                    .unwrap_or(response.client_id);
                let Some(client) = clients.get(&client_id) else {
                    continue;
                };

                for line in &response.lines {
                    let _ = client.writer_tx.send(line.clone()).await;
                }

                // Completion markers are emitted when the client enabled
                // acknowledgements or when the response carries a payload.
                if client.ack || !response.lines.is_empty() {
                    let marker =
                        if response.ok { "done" } else { "error" };
                    let marker = match (&response.request_id, client.ack) {
                        (Some(request_id), true) => {
                            format!("{} request_id={}", marker, request_id)
                        }
                        _ => marker.to_string(),
                    };
                    let _ = client.writer_tx.send(marker).await;
                }
            }
            // Event to broadcast to every client.
            event = api_event_rx.recv() => {
                let Some(event) = event else { break };
                let lines = encoder::event_lines(&event);
                for client in clients.values() {
                    for line in &lines {
                        let _ = client.writer_tx.send(line.clone()).await;
                    }
                }
            }
        }
    }
}

// Spawns the reader and writer tasks of an accepted client connection.
#[cfg(not(feature = "testing"))]
fn client_setup(
    client_id: u64,
    stream: tokio::net::UnixStream,
    client_linep: Sender<ClientLine>,
) -> Client {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (read_half, mut write_half) = stream.into_split();

    // Writer task: drains the bounded per-client queue.
    let (writer_tx, mut writer_rx) = mpsc::channel::<String>(
        CLIENT_WRITE_QUEUE,
    );
    let writer_task = Task::spawn(async move {
        while let Some(line) = writer_rx.recv().await {
            let mut line = line;
            line.push('\n');
            if let Err(error) = write_half.write_all(line.as_bytes()).await {
                crate::error::Error::ProcessError(error).log();
                break;
            }
        }
    });

    // Reader task: forwards complete lines to the server loop.
    let reader_task = Task::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if client_linep
                        .send(ClientLine {
                            client_id,
                            line: Some(line),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = client_linep
                        .send(ClientLine {
                            client_id,
                            line: None,
                        })
                        .await;
                    break;
                }
            }
        }
    });

    Client {
        uuid: None,
        start_ts: None,
        ack: false,
        writer_tx,
        _writer_task: writer_task,
        _reader_task: reader_task,
    }
}
