//! Mock SMTP server for delivery scenario tests.
//!
//! Accepts plaintext sessions, answers each command with a configured
//! reply, and records every command and message payload it sees.
#![allow(dead_code)] // Test utility module; not every helper is used in every test.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

#[derive(Debug, Clone)]
struct Replies {
    greeting: String,
    ehlo: String,
    mail_from: String,
    rcpt_to: String,
    data: String,
    data_end: String,
    quit: String,
    greeting_delay: Option<Duration>,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            greeting: "220 mock ready".to_string(),
            ehlo: "250 mock".to_string(),
            mail_from: "250 OK".to_string(),
            rcpt_to: "250 OK".to_string(),
            data: "354 go ahead".to_string(),
            data_end: "250 queued".to_string(),
            quit: "221 bye".to_string(),
            greeting_delay: None,
        }
    }
}

/// Builder-configured mock server.
pub struct MockServerBuilder {
    replies: Replies,
}

impl MockServerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            replies: Replies::default(),
        }
    }

    /// Override the RCPT TO reply, e.g. `"550 user unknown"`.
    #[must_use]
    pub fn rcpt_to(mut self, reply: &str) -> Self {
        self.replies.rcpt_to = reply.to_string();
        self
    }

    /// Override the end-of-data reply.
    #[must_use]
    pub fn data_end(mut self, reply: &str) -> Self {
        self.replies.data_end = reply.to_string();
        self
    }

    /// Delay the greeting to exercise deadline handling.
    #[must_use]
    pub fn greeting_delay(mut self, delay: Duration) -> Self {
        self.replies.greeting_delay = Some(delay);
        self
    }

    pub async fn start(self) -> MockSmtpServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let commands = Arc::new(Mutex::new(Vec::new()));
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let replies = self.replies;
        let task_commands = commands.clone();
        let task_messages = messages.clone();
        let task_connections = connections.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                task_connections.fetch_add(1, Ordering::SeqCst);
                let replies = replies.clone();
                let commands = task_commands.clone();
                let messages = task_messages.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, replies, commands, messages).await;
                });
            }
        });

        MockSmtpServer {
            addr,
            commands,
            messages,
            connections,
            _handle: handle,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockSmtpServer {
    pub async fn start() -> Self {
        MockServerBuilder::new().start().await
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command line received, across all sessions, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Message payloads accepted after DATA.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Received commands starting with `prefix`.
    #[must_use]
    pub fn commands_matching(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.starts_with(prefix))
            .collect()
    }
}

async fn serve(
    stream: TcpStream,
    replies: Replies,
    commands: Arc<Mutex<Vec<String>>>,
    messages: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    if let Some(delay) = replies.greeting_delay {
        tokio::time::sleep(delay).await;
    }
    write_half
        .write_all(format!("{}\r\n", replies.greeting).as_bytes())
        .await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end().to_string();
        commands.lock().unwrap().push(command.clone());

        let upper = command.to_uppercase();
        let reply = if upper.starts_with("EHLO") || upper.starts_with("HELO") {
            &replies.ehlo
        } else if upper.starts_with("MAIL FROM") {
            &replies.mail_from
        } else if upper.starts_with("RCPT TO") {
            &replies.rcpt_to
        } else if upper.starts_with("DATA") {
            write_half
                .write_all(format!("{}\r\n", replies.data).as_bytes())
                .await?;

            let mut payload = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                if line.trim_end() == "." {
                    break;
                }
                payload.push_str(&line);
            }
            messages.lock().unwrap().push(payload);
            &replies.data_end
        } else if upper.starts_with("QUIT") {
            write_half
                .write_all(format!("{}\r\n", replies.quit).as_bytes())
                .await?;
            return Ok(());
        } else {
            &replies.ehlo
        };

        write_half
            .write_all(format!("{reply}\r\n").as_bytes())
            .await?;
    }
}
