//! Hub client
//!
//! Minimal HTTP/1.1 form POSTs to the coordinating hub. Only the status code
//! of the response is read.

use crate::command::SharedSecret;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use door_shared::encode_form;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Longest status line accepted from the hub
const MAX_STATUS_LINE: usize = 1024;

/// Announces this device to the hub
#[async_trait]
pub trait HubNotifier: Send + Sync {
    /// Register `id` with the hub, returning the HTTP status code
    async fn register_device(&self, id: &str) -> Result<u16>;
}

/// Talks to the hub over plain HTTP
#[derive(Debug, Clone)]
pub struct HubClient {
    /// `host` or `host:port` (port 80 when omitted)
    address: String,
    secret: SharedSecret,
    timeout: Duration,
}

impl HubClient {
    pub fn new(address: impl Into<String>, secret: SharedSecret) -> Self {
        Self {
            address: address.into(),
            secret,
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the whole-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log an error against this device on the hub
    pub async fn report_error(&self, id: &str, error: &str) -> Result<u16> {
        self.post("/error", &[("id", id), ("psk", self.secret.expose()), ("error", error)])
            .await
    }

    /// Ask the hub to act on another node (`params` is a `key=value&...` string)
    pub async fn perform_action(&self, id: &str, affect: &str, params: &str) -> Result<u16> {
        self.post(
            "/action",
            &[
                ("id", id),
                ("psk", self.secret.expose()),
                ("affect", affect),
                ("params", params),
            ],
        )
        .await
    }

    async fn post(&self, path: &str, fields: &[(&str, &str)]) -> Result<u16> {
        let body = encode_form(fields);
        timeout(self.timeout, self.send(path, &body))
            .await
            .map_err(|_| anyhow!("Hub request to {} timed out after {:?}", path, self.timeout))?
    }

    async fn send(&self, path: &str, body: &str) -> Result<u16> {
        let mut stream = TcpStream::connect(self.authority()).await?;

        let head = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            path,
            self.address,
            body.len()
        );
        let mut request = BytesMut::with_capacity(head.len() + body.len());
        request.put_slice(head.as_bytes());
        request.put_slice(body.as_bytes());
        stream.write_all(&request).await?;

        let mut response = Vec::with_capacity(128);
        let mut buf = [0u8; 256];
        while !response.windows(2).any(|w| w == b"\r\n") && response.len() < MAX_STATUS_LINE {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
        }

        let status = parse_status_line(&response)?;
        debug!("[HUB] POST {} -> {}", path, status);
        Ok(status)
    }

    fn authority(&self) -> String {
        if self.address.contains(':') {
            self.address.clone()
        } else {
            format!("{}:80", self.address)
        }
    }
}

#[async_trait]
impl HubNotifier for HubClient {
    async fn register_device(&self, id: &str) -> Result<u16> {
        self.post("/register", &[("id", id), ("psk", self.secret.expose())])
            .await
    }
}

/// Extract the status code from `HTTP/1.1 200 OK`
fn parse_status_line(response: &[u8]) -> Result<u16> {
    let line = response.split(|&b| b == b'\n').next().unwrap_or_default();
    let line = std::str::from_utf8(line).map_err(|_| anyhow!("Hub sent a non-UTF-8 status line"))?;

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse::<u16>()
            .map_err(|_| anyhow!("Hub sent an invalid status code: {:?}", code)),
        _ => Err(anyhow!("Hub sent no status line")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use door_shared::{RawRequest, RequestDecoder};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const PSK: &str = "access-front-door-psk";

    fn secret() -> SharedSecret {
        SharedSecret::new(PSK).unwrap()
    }

    /// One-shot hub: captures the request and answers with `status_line`
    async fn fake_hub(status_line: &'static str) -> (String, JoinHandle<RawRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = RequestDecoder::new();
            let mut buf = vec![0u8; 1024];
            let request = loop {
                let n = socket.read(&mut buf).await.unwrap();
                decoder.extend(&buf[..n]);
                if let Some(request) = decoder.decode_next().unwrap() {
                    break request;
                }
            };
            socket
                .write_all(format!("{}\r\nContent-Length: 0\r\n\r\n", status_line).as_bytes())
                .await
                .unwrap();
            request
        });

        (addr, task)
    }

    #[tokio::test]
    async fn test_register_device() {
        let (addr, hub) = fake_hub("HTTP/1.1 200 OK").await;
        let client = HubClient::new(addr, secret());

        assert_eq!(client.register_device("access-front-door").await.unwrap(), 200);

        let request = hub.await.unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.target, "/register");
        let form = request.form().unwrap();
        assert_eq!(form.get("id"), Some("access-front-door"));
        assert_eq!(form.get("psk"), Some(PSK));
        assert_eq!(form.keys().collect::<Vec<_>>(), ["id", "psk"]);
    }

    #[tokio::test]
    async fn test_rejection_status_is_returned() {
        let (addr, _hub) = fake_hub("HTTP/1.1 403 Forbidden").await;
        let client = HubClient::new(addr, secret());

        assert_eq!(client.register_device("unknown-node").await.unwrap(), 403);
    }

    #[tokio::test]
    async fn test_perform_action() {
        let (addr, hub) = fake_hub("HTTP/1.1 200 OK").await;
        let client = HubClient::new(addr, secret());

        let status = client
            .perform_action("doorbell", "access-front-door", "duration=15")
            .await
            .unwrap();
        assert_eq!(status, 200);

        let request = hub.await.unwrap();
        assert_eq!(request.target, "/action");
        let form = request.form().unwrap();
        assert_eq!(form.get("affect"), Some("access-front-door"));
        assert_eq!(form.nested("params").unwrap().get("duration"), Some("15"));
    }

    #[tokio::test]
    async fn test_report_error() {
        let (addr, hub) = fake_hub("HTTP/1.1 200 OK").await;
        let client = HubClient::new(addr, secret());

        client.report_error("access-front-door", "relay fault & retry").await.unwrap();

        let form = hub.await.unwrap().form().unwrap();
        assert_eq!(form.get("error"), Some("relay fault & retry"));
    }

    #[tokio::test]
    async fn test_unreachable_hub_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = HubClient::new(addr, secret());
        assert!(client.register_device("access-front-door").await.is_err());
    }

    #[tokio::test]
    async fn test_silent_hub_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let client = HubClient::new(addr, secret()).with_timeout(Duration::from_millis(100));
        let err = client.register_device("access-front-door").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200 OK\r\n").unwrap(), 200);
        assert_eq!(parse_status_line(b"HTTP/1.0 500 Internal Server Error\r\n").unwrap(), 500);
        assert!(parse_status_line(b"").is_err());
        assert!(parse_status_line(b"SSH-2.0-OpenSSH\r\n").is_err());
        assert!(parse_status_line(b"HTTP/1.1 abc\r\n").is_err());
    }

    #[test]
    fn test_default_port() {
        let client = HubClient::new("192.168.1.10", secret());
        assert_eq!(client.authority(), "192.168.1.10:80");
        let client = HubClient::new("hub.local:8000", secret());
        assert_eq!(client.authority(), "hub.local:8000");
    }
}
