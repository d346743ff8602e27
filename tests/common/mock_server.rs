//! Scripted in-process NNTP server
//!
//! Serves a fixed set of article bodies on `127.0.0.1:0` and counts what the
//! client does with it: connections, GROUP and BODY commands.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Default)]
struct ServerState {
    articles: HashMap<String, Vec<u8>>,
    credentials: Option<(String, String)>,
    reject_groups: bool,
    body_delay: Option<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
    connections: AtomicUsize,
    group_commands: AtomicUsize,
    body_commands: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

/// Builder for [`MockServer`]
#[derive(Default)]
pub struct MockServerBuilder {
    state: ServerState,
}

impl MockServerBuilder {
    /// Serve `body` (raw, un-stuffed) for `message_id`
    pub fn article(mut self, message_id: &str, body: Vec<u8>) -> Self {
        self.state.articles.insert(message_id.to_string(), body);
        self
    }

    /// Require `AUTHINFO` with these credentials
    pub fn credentials(mut self, user: &str, pass: &str) -> Self {
        self.state.credentials = Some((user.to_string(), pass.to_string()));
        self
    }

    /// Answer every GROUP with 411
    pub fn reject_groups(mut self) -> Self {
        self.state.reject_groups = true;
        self
    }

    /// Sleep before answering each BODY
    pub fn body_delay(mut self, delay: Duration) -> Self {
        self.state.body_delay = Some(delay);
        self
    }

    /// Bind and start serving
    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(self.state);

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
                    state.peak.fetch_max(now, Ordering::SeqCst);
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    let _ = serve(socket, &state).await;
                    state.active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        MockServer {
            addr,
            state,
            task,
        }
    }
}

/// Running mock server; stops when dropped
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Start building a server
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// Port the server listens on
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Most connections open at the same time
    pub fn peak_connections(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// GROUP commands received
    pub fn group_commands(&self) -> usize {
        self.state.group_commands.load(Ordering::SeqCst)
    }

    /// BODY commands received
    pub fn body_commands(&self) -> usize {
        self.state.body_commands.load(Ordering::SeqCst)
    }

    /// Message ids requested with BODY, in arrival order
    pub fn requested(&self) -> Vec<String> {
        self.state.requested.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, state: &ServerState) -> std::io::Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"200 mock server ready\r\n").await?;

    let mut user = None;
    while let Some(line) = lines.next_line().await? {
        let (command, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match command.to_ascii_uppercase().as_str() {
            "AUTHINFO" => {
                let (kind, value) = argument.split_once(' ').unwrap_or((argument, ""));
                if kind.eq_ignore_ascii_case("USER") {
                    user = Some(value.to_string());
                    write.write_all(b"381 password required\r\n").await?;
                } else {
                    let accepted = match &state.credentials {
                        Some((u, p)) => user.as_deref() == Some(u.as_str()) && value == p,
                        None => true,
                    };
                    if accepted {
                        write.write_all(b"281 authentication accepted\r\n").await?;
                    } else {
                        write.write_all(b"481 authentication failed\r\n").await?;
                    }
                }
            }
            "GROUP" => {
                state.group_commands.fetch_add(1, Ordering::SeqCst);
                if state.reject_groups {
                    write.write_all(b"411 no such group\r\n").await?;
                } else {
                    write
                        .write_all(format!("211 1 1 1 {}\r\n", argument).as_bytes())
                        .await?;
                }
            }
            "BODY" => {
                state.body_commands.fetch_add(1, Ordering::SeqCst);
                let id = argument.trim_start_matches('<').trim_end_matches('>');
                state.requested.lock().unwrap().push(id.to_string());
                if let Some(delay) = state.body_delay {
                    tokio::time::sleep(delay).await;
                }
                match state.articles.get(id) {
                    Some(body) => {
                        write
                            .write_all(format!("222 0 <{}> body follows\r\n", id).as_bytes())
                            .await?;
                        write.write_all(&dot_stuff(body)).await?;
                        write.write_all(b".\r\n").await?;
                    }
                    None => write.write_all(b"430 no such article\r\n").await?,
                }
            }
            "QUIT" => {
                write.write_all(b"205 bye\r\n").await?;
                return Ok(());
            }
            _ => write.write_all(b"500 unknown command\r\n").await?,
        }
    }
    Ok(())
}

fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    for line in body.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b".") {
            out.push(b'.');
        }
        out.extend_from_slice(line);
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}
