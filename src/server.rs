use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::dispatch::DispatchGateway;
use crate::handler::{self, DispatchResponse};

/// Env var overriding the idle timeout (milliseconds).
pub const IDLE_TIMEOUT_ENV: &str = "LORA_DISPATCH_IDLE_TIMEOUT_MS";
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

#[derive(Clone)]
/// Network front for the dispatch gateway.
///
/// TCP peers send one JSON request per line and get one JSON response line
/// back, in order. UDP peers send one request per datagram. Both listeners
/// share the same [`DispatchGateway`] and therefore the same queue store.
pub struct DispatchServer {
    gateway: DispatchGateway,
    idle_timeout: Duration,
    max_line_len: usize,
}

impl DispatchServer {
    pub fn new(gateway: DispatchGateway) -> Self {
        Self {
            gateway,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    pub fn gateway(&self) -> &DispatchGateway {
        &self.gateway
    }

    pub async fn run_listener(self, bind: &str) -> anyhow::Result<()> {
        tracing::info!(%bind, "dispatch server binding");
        let listener = TcpListener::bind(bind).await?;
        self.run_listener_on(listener).await
    }

    /// Run the accept loop on an already-bound listener. One task per
    /// connection; a failing connection never takes the loop down.
    pub async fn run_listener_on(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                tracing::info!(%peer, "accepted connection");
                if let Err(e) = server.serve_connection(socket).await {
                    tracing::warn!(%peer, %e, "connection ended with error");
                }
                tracing::debug!(%peer, "connection closed");
            });
        }
    }

    async fn serve_connection(&self, mut socket: TcpStream) -> anyhow::Result<()> {
        let mut read_buf = vec![0u8; 4096];
        let mut acc: Vec<u8> = Vec::new();
        loop {
            let n = match tokio::time::timeout(self.idle_timeout, socket.read(&mut read_buf)).await
            {
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    tracing::info!(
                        idle_ms = self.idle_timeout.as_millis() as u64,
                        "connection idle, closing"
                    );
                    return Ok(());
                }
            };
            acc.extend_from_slice(&read_buf[..n]);

            while let Some(pos) = acc.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = acc.drain(..=pos).collect();
                let line = trim_line(&line);
                if line.len() > self.max_line_len {
                    return self.reject_long_line(&mut socket, line.len()).await;
                }
                if line.is_empty() {
                    continue;
                }
                let resp = handler::handle_frame(&self.gateway, line).await;
                socket.write_all(&handler::encode_response(&resp)).await?;
            }

            // an unterminated line is already too long
            if acc.len() > self.max_line_len {
                return self.reject_long_line(&mut socket, acc.len()).await;
            }
        }
    }

    async fn reject_long_line(&self, socket: &mut TcpStream, len: usize) -> anyhow::Result<()> {
        tracing::warn!(len, max = self.max_line_len, "request line too long");
        let resp = DispatchResponse::malformed(format!("line exceeds {} bytes", self.max_line_len));
        socket.write_all(&handler::encode_response(&resp)).await?;
        socket.shutdown().await?;
        Ok(())
    }

    /// Answer each datagram (one JSON request) to its sender.
    pub async fn run_udp_listener(&self, bind: &str) -> anyhow::Result<()> {
        tracing::info!(%bind, "udp dispatch server binding");
        let socket = UdpSocket::bind(bind).await?;
        self.run_udp_listener_on(socket).await
    }

    pub async fn run_udp_listener_on(&self, socket: UdpSocket) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, peer) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(%e, "udp recv_from failed");
                    continue;
                }
            };
            tracing::debug!(udp_len = n, peer = %peer, "received udp request");
            let resp = handler::handle_frame(&self.gateway, trim_line(&buf[..n])).await;
            if let Err(e) = socket.send_to(&handler::encode_response(&resp), peer).await {
                tracing::error!(%e, peer = %peer, "failed to send udp response");
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}
