//! Minimal Source RCON client used to talk to running servers.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::RconError;
use crate::registry::InstanceRegistry;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

const MAX_PACKET_SIZE: i32 = 1 << 20;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const SHUTDOWN_COMMAND: &str = "doexit";

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9\s]+").unwrap();
}

/// Asks a running instance to exit on its own.
#[async_trait]
pub trait ShutdownSignal: Send + Sync {
    /// Resolves once the instance acknowledged the request.
    async fn send_shutdown(&self, name: &str) -> Result<String, RconError>;
}

/// Strips everything but alphanumerics and whitespace, lower-cased.
pub fn sanitize_command(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, "").to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    id: i32,
    kind: i32,
    body: String,
}

async fn write_packet<W>(stream: &mut W, packet: &Packet) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    let body = packet.body.as_bytes();
    let size = (body.len() + 10) as i32;
    let mut buf = Vec::with_capacity(body.len() + 14);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&packet.id.to_le_bytes());
    buf.extend_from_slice(&packet.kind.to_le_bytes());
    buf.extend_from_slice(body);
    buf.extend_from_slice(&[0, 0]);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_packet<R>(stream: &mut R) -> Result<Packet, RconError>
where
    R: AsyncRead + Unpin,
{
    let size = stream.read_i32_le().await?;
    if !(10..=MAX_PACKET_SIZE).contains(&size) {
        return Err(RconError::Protocol(format!("packet size {size}")));
    }
    let id = stream.read_i32_le().await?;
    let kind = stream.read_i32_le().await?;

    let mut body = vec![0u8; size as usize - 8];
    stream.read_exact(&mut body).await?;
    // Body and trailing empty string are both NUL terminated.
    while body.last() == Some(&0) {
        body.pop();
    }

    Ok(Packet {
        id,
        kind,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

pub struct RconClient {
    registry: Arc<InstanceRegistry>,
    io_timeout: Duration,
}

impl RconClient {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self {
            registry,
            io_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Runs one sanitized console command on `name` and returns its reply.
    pub async fn execute(&self, name: &str, command: &str) -> Result<String, RconError> {
        let endpoint = self
            .registry
            .console(name)
            .ok_or_else(|| RconError::NotConfigured(name.to_string()))?;
        let command = sanitize_command(command);
        log::info!("rcon '{}': {}", name, command);

        let session = async {
            let addr = endpoint.address();
            let mut stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| RconError::Connect { addr, source })?;
            authenticate(&mut stream, &endpoint.pass).await?;
            run_command(&mut stream, &command).await
        };

        timeout(self.io_timeout, session)
            .await
            .map_err(|_| RconError::Timeout)?
    }
}

#[async_trait]
impl ShutdownSignal for RconClient {
    async fn send_shutdown(&self, name: &str) -> Result<String, RconError> {
        self.execute(name, SHUTDOWN_COMMAND).await
    }
}

async fn authenticate<S>(stream: &mut S, password: &str) -> Result<(), RconError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = Packet {
        id: 1,
        kind: SERVERDATA_AUTH,
        body: password.to_string(),
    };
    write_packet(stream, &request).await?;

    // Some servers send an empty RESPONSE_VALUE before the auth result.
    loop {
        let reply = read_packet(stream).await?;
        if reply.kind != SERVERDATA_AUTH_RESPONSE {
            continue;
        }
        if reply.id == -1 {
            return Err(RconError::AuthRejected);
        }
        return Ok(());
    }
}

async fn run_command<S>(stream: &mut S, command: &str) -> Result<String, RconError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = Packet {
        id: 2,
        kind: SERVERDATA_EXECCOMMAND,
        body: command.to_string(),
    };
    write_packet(stream, &request).await?;

    loop {
        let reply = read_packet(stream).await?;
        if reply.id == request.id && reply.kind == SERVERDATA_RESPONSE_VALUE {
            return Ok(reply.body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceProcessConfig, RconEndpoint};
    use tokio::net::TcpListener;

    #[test]
    fn sanitize_strips_symbols_and_lowercases() {
        assert_eq!(sanitize_command("SaveWorld; rm -rf /"), "saveworld rm rf ");
        assert_eq!(sanitize_command("DoExit"), "doexit");
    }

    #[tokio::test]
    async fn packets_survive_the_wire_format() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let packet = Packet {
            id: 7,
            kind: SERVERDATA_EXECCOMMAND,
            body: "listplayers".into(),
        };
        write_packet(&mut a, &packet).await.unwrap();
        assert_eq!(read_packet(&mut b).await.unwrap(), packet);
    }

    #[tokio::test]
    async fn oversized_packet_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_PACKET_SIZE + 1).to_le_bytes()).await.unwrap();
        assert!(matches!(
            read_packet(&mut b).await,
            Err(RconError::Protocol(_))
        ));
    }

    async fn fake_server(password: &'static str, reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let auth = read_packet(&mut stream).await.unwrap();
            let id = if auth.body == password { auth.id } else { -1 };
            let empty = Packet { id: auth.id, kind: SERVERDATA_RESPONSE_VALUE, body: String::new() };
            write_packet(&mut stream, &empty).await.unwrap();
            let result = Packet { id, kind: SERVERDATA_AUTH_RESPONSE, body: String::new() };
            write_packet(&mut stream, &result).await.unwrap();
            if id == -1 {
                return;
            }
            let command = read_packet(&mut stream).await.unwrap();
            let answer = Packet {
                id: command.id,
                kind: SERVERDATA_RESPONSE_VALUE,
                body: format!("{reply} ({})", command.body),
            };
            write_packet(&mut stream, &answer).await.unwrap();
        });
        port
    }

    fn client(port: u16, pass: &str) -> RconClient {
        let process = InstanceProcessConfig {
            name: "island".into(),
            executable: "/srv/island/server".into(),
            args: Vec::new(),
            dir: None,
            restart_interval: 10,
        };
        let registry = InstanceRegistry::from_parts(
            vec![process],
            Vec::new(),
            vec![RconEndpoint {
                map: "island".into(),
                ip: "127.0.0.1".into(),
                port: port.to_string(),
                pass: pass.into(),
            }],
        )
        .unwrap();
        RconClient::new(Arc::new(registry)).with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn shutdown_is_acknowledged() {
        let port = fake_server("hunter2", "Exiting...").await;
        let reply = client(port, "hunter2").send_shutdown("island").await.unwrap();
        assert_eq!(reply, "Exiting... (doexit)");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let port = fake_server("hunter2", "Exiting...").await;
        let err = client(port, "nope").send_shutdown("island").await.unwrap_err();
        assert!(matches!(err, RconError::AuthRejected));
    }

    #[tokio::test]
    async fn unknown_map_has_no_endpoint() {
        let err = client(1, "x").execute("center", "saveworld").await.unwrap_err();
        assert!(matches!(err, RconError::NotConfigured(name) if name == "center"));
    }
}
