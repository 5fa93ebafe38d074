//! Mock relay for exercising the submission client.
//!
//! The server can:
//! - Advertise a configurable set of EHLO extensions
//! - Answer AUTH PLAIN and AUTH LOGIN
//! - Refuse individual recipients or whole commands
//! - Drop the connection or delay replies
//! - Record every command and message it receives

#![allow(dead_code)] // Not every test uses every knob

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// Command received by the mock relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Raw message lines as received after DATA, terminator excluded.
    MessageContent(String),
    Auth(String),
    Rset,
    StartTls,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    capabilities: Vec<String>,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    rejected_recipients: Vec<String>,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    auth_response: SmtpResponse,
    rset_response: SmtpResponse,
    quit_response: SmtpResponse,

    response_delay: Option<Duration>,
    drop_after_commands: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock relay ready"),
            capabilities: vec!["SIZE 10000000".to_string()],
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            rejected_recipients: Vec::new(),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            auth_response: SmtpResponse::new(235, "Authentication successful"),
            rset_response: SmtpResponse::new(250, "Reset"),
            quit_response: SmtpResponse::new(221, "Bye"),
            response_delay: None,
            drop_after_commands: None,
        }
    }
}

impl MockServerConfig {
    fn ehlo_bytes(&self, hostname: &str) -> Vec<u8> {
        let mut response = String::new();
        let mut lines = vec![format!("mock.relay greets {hostname}")];
        lines.extend(self.capabilities.iter().cloned());

        let last = lines.len() - 1;
        for (i, line) in lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            let _ = write!(&mut response, "250{sep}{line}\r\n");
        }

        response.into_bytes()
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Messages received, in order.
    pub async fn messages(&self) -> Vec<String> {
        self.commands_received
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of TCP connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn read_line(
        reader: &mut BufReader<tokio::net::tcp::ReadHalf<'_>>,
        line: &mut String,
    ) -> Result<bool, std::io::Error> {
        line.clear();
        match timeout(Duration::from_secs(10), reader.read_line(line)).await {
            Ok(Ok(0)) | Err(_) => Ok(false),
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e),
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), std::io::Error> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut handled = 0;

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;
        if config.greeting.code != 220 {
            return Ok(());
        }

        loop {
            if config.drop_after_commands.is_some_and(|limit| handled >= limit) {
                return Ok(());
            }

            if !Self::read_line(&mut reader, &mut line).await? {
                return Ok(());
            }
            handled += 1;

            let cmd_line = line.trim_end().to_string();
            tracing::debug!("Mock relay received: {cmd_line}");

            let (verb, argument) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(verb, rest)| (verb, rest));

            let (command, response) = match verb.to_uppercase().as_str() {
                "EHLO" => (
                    SmtpCommand::Ehlo(argument.to_string()),
                    config.ehlo_bytes(argument),
                ),
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.trim_start_matches("FROM:").to_string()),
                    config.mail_from_response.to_bytes(),
                ),
                "RCPT" => {
                    let to = argument.trim_start_matches("TO:").to_string();
                    let address = to.trim_matches(|c| c == '<' || c == '>');
                    let response = if config.rejected_recipients.iter().any(|r| r == address) {
                        SmtpResponse::new(550, "No such user").to_bytes()
                    } else {
                        config.rcpt_to_response.to_bytes()
                    };
                    (SmtpCommand::RcptTo(to), response)
                }
                "RSET" => (SmtpCommand::Rset, config.rset_response.to_bytes()),
                "STARTTLS" => (
                    SmtpCommand::StartTls,
                    SmtpResponse::new(454, "TLS not available").to_bytes(),
                ),
                "AUTH" => {
                    if argument.eq_ignore_ascii_case("LOGIN") {
                        writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                        writer.flush().await?;
                        if !Self::read_line(&mut reader, &mut line).await? {
                            return Ok(());
                        }
                        let username = line.trim_end().to_string();

                        writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                        writer.flush().await?;
                        if !Self::read_line(&mut reader, &mut line).await? {
                            return Ok(());
                        }
                        let password = line.trim_end().to_string();

                        (
                            SmtpCommand::Auth(format!("LOGIN {username} {password}")),
                            config.auth_response.to_bytes(),
                        )
                    } else {
                        (
                            SmtpCommand::Auth(argument.to_string()),
                            config.auth_response.to_bytes(),
                        )
                    }
                }
                "DATA" => (SmtpCommand::Data, config.data_response.to_bytes()),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&config.quit_response.to_bytes()).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(cmd_line.clone()),
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }

            writer.write_all(&response).await?;
            writer.flush().await?;

            if is_data && config.data_response.code == 354 {
                let mut content = String::new();
                loop {
                    if !Self::read_line(&mut reader, &mut line).await? {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.push_str(&line);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                writer
                    .write_all(&config.data_end_response.to_bytes())
                    .await?;
                writer.flush().await?;
            }
        }
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Replace the extensions advertised after the EHLO greeting line.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// Refuse RCPT for this address with a 550.
    #[must_use]
    pub fn rejecting_recipient(mut self, address: impl Into<String>) -> Self {
        self.config.rejected_recipients.push(address.into());
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Close the connection once this many commands have been answered.
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Bind to a random local port and start serving.
    ///
    /// # Errors
    /// If the listener can't be bound.
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let server_commands = Arc::clone(&commands);
        let server_connections = Arc::clone(&connections);
        let server_shutdown = Arc::clone(&shutdown);

        tokio::spawn(async move {
            while !server_shutdown.load(Ordering::Relaxed) {
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                server_connections.fetch_add(1, Ordering::Relaxed);
                let config = Arc::clone(&config);
                let commands = Arc::clone(&server_commands);

                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::handle_client(stream, config, commands).await {
                        tracing::debug!("Mock relay client error: {e}");
                    }
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            connections,
            shutdown,
        })
    }
}
