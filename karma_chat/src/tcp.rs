use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;

use crate::transport::{ChatError, ChatMessage, ChatTransport};

/// Bounded outbox capacity per spec.md §4.6 ("a small per-channel outbox").
const OUTBOX_CAPACITY: usize = 32;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// A `tokio`-based, optionally-TLS line transport. Wire framing is one line
/// per message: `JOIN <channel>`, `SEND <channel> <line>` outbound,
/// `MSG <channel> <sender> <line>` inbound.
pub struct TcpChatTransport {
    host: String,
    port: u16,
    use_tls: bool,
    identity: String,
    joined: HashSet<String>,
    reader: Option<BufReader<ReadHalf<Box<dyn AsyncStream>>>>,
    outbox_tx: Option<mpsc::Sender<String>>,
}

impl TcpChatTransport {
    /// `server` is `host:port`; TLS is used when `use_tls` is set, matching
    /// the "SSL TCP" wire description in spec.md §6.
    pub fn new(server: &str, use_tls: bool, identity: impl Into<String>) -> Self {
        let (host, port) = server
            .rsplit_once(':')
            .map(|(h, p)| (h.to_string(), p.parse().unwrap_or(6667)))
            .unwrap_or((server.to_string(), 6667));
        Self {
            host,
            port,
            use_tls,
            identity: identity.into(),
            joined: HashSet::new(),
            reader: None,
            outbox_tx: None,
        }
    }

    async fn dial(&self) -> Result<Box<dyn AsyncStream>, ChatError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ChatError::ConnectionFailed(e.to_string()))?;

        if !self.use_tls {
            return Ok(Box::new(tcp));
        }

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| ChatError::Tls(e.to_string()))?;
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ChatError::Tls(e.to_string()))?;
        Ok(Box::new(tls_stream))
    }

    async fn writer_loop(mut write_half: WriteHalf<Box<dyn AsyncStream>>, mut rx: mpsc::Receiver<String>) {
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                warn!("chat transport write failed, dropping writer task: {e}");
                return;
            }
            if let Err(e) = write_half.write_all(b"\n").await {
                warn!("chat transport write failed, dropping writer task: {e}");
                return;
            }
        }
    }
}

#[async_trait]
impl ChatTransport for TcpChatTransport {
    async fn connect(&mut self) -> Result<(), ChatError> {
        let stream = self.dial().await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        tokio::spawn(Self::writer_loop(write_half, rx));
        tx.send(format!("AUTH {}", self.identity))
            .await
            .map_err(|_| ChatError::NotConnected)?;
        self.reader = Some(BufReader::new(read_half));
        self.outbox_tx = Some(tx);
        debug!("chat transport connected to {}:{}", self.host, self.port);
        Ok(())
    }

    async fn join(&mut self, channel: &str) -> Result<(), ChatError> {
        let tx = self.outbox_tx.as_ref().ok_or(ChatError::NotConnected)?;
        tx.send(format!("JOIN {channel}"))
            .await
            .map_err(|_| ChatError::NotConnected)?;
        self.joined.insert(channel.to_string());
        Ok(())
    }

    async fn send(&self, channel: &str, line: &str) -> Result<(), ChatError> {
        let tx = self.outbox_tx.as_ref().ok_or(ChatError::NotConnected)?;
        match tx.try_send(format!("SEND {channel} {line}")) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("karma_chat_messages_dropped_total").increment(1);
                warn!("chat outbox full for channel {channel}, dropping message");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChatError::NotConnected),
        }
    }

    async fn recv(&mut self, deadline: Duration) -> Result<Option<ChatMessage>, ChatError> {
        let reader = self.reader.as_mut().ok_or(ChatError::NotConnected)?;
        let mut line = String::new();
        tokio::select! {
            result = reader.read_line(&mut line) => {
                let bytes_read = result?;
                if bytes_read == 0 {
                    return Err(ChatError::ConnectionFailed("stream closed".into()));
                }
                Ok(parse_inbound(line.trim_end()))
            }
            _ = tokio::time::sleep(deadline) => Ok(None),
        }
    }
}

fn parse_inbound(line: &str) -> Option<ChatMessage> {
    let mut parts = line.splitn(3, ' ');
    let tag = parts.next()?;
    if tag != "MSG" {
        return None;
    }
    let channel = parts.next()?.to_string();
    let rest = parts.next()?;
    let (sender, content) = rest.split_once(' ')?;
    Some(ChatMessage {
        at: Utc::now(),
        sender: sender.to_string(),
        channel,
        line: content.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inbound_message_frame() {
        let parsed = parse_inbound("MSG marketplace seller-07 HAVE: raw_logs | $2.50 USDC | logs").unwrap();
        assert_eq!(parsed.channel, "marketplace");
        assert_eq!(parsed.sender, "seller-07");
        assert_eq!(parsed.line, "HAVE: raw_logs | $2.50 USDC | logs");
    }

    #[test]
    fn ignores_non_msg_frames() {
        assert!(parse_inbound("PING").is_none());
    }

    #[test]
    fn new_parses_host_and_port() {
        let transport = TcpChatTransport::new("chat.example.com:6697", true, "agent-01");
        assert_eq!(transport.host, "chat.example.com");
        assert_eq!(transport.port, 6697);
    }
}
