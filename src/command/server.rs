//! TCP command server
//!
//! One request per connection. The fixed acknowledgement is written and the
//! connection closed before the verdict is acted on, so neither the response
//! bytes nor their timing depend on whether the request authenticated.

use super::request::{CommandHandler, DropReason, Verdict};
use crate::scheduler::UnlockHandle;
use anyhow::Result;
use door_shared::{protocol::ACK_RESPONSE, RawRequest, RequestDecoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long a client gets to deliver its whole request
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections served at once; further clients wait in the listen backlog
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Accepts unlock commands and forwards them to the scheduler
pub struct CommandServer {
    listener: TcpListener,
    handler: Arc<CommandHandler>,
    scheduler: UnlockHandle,
    read_timeout: Duration,
    connections: Arc<Semaphore>,
}

impl CommandServer {
    /// Bind the listening socket
    pub async fn bind(addr: &str, handler: CommandHandler, scheduler: UnlockHandle) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            scheduler,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connections: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
        })
    }

    /// Override the per-request read timeout
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Override how many connections are served concurrently (at least one)
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.connections = Arc::new(Semaphore::new(max_connections.max(1)));
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub async fn run(self) {
        info!("[CMD] Accepting unlock commands");

        loop {
            // Held for the lifetime of the connection task
            let permit = match self.connections.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("[CMD] Connection limiter closed, no longer accepting");
                    return;
                }
            };

            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("[CMD] Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!("[CMD] Connection from {}", addr);

            let handler = self.handler.clone();
            let scheduler = self.scheduler.clone();
            let read_timeout = self.read_timeout;
            let task = tokio::spawn(async move {
                let verdict = serve_connection(stream, &handler, &scheduler, read_timeout).await;
                drop(permit);
                verdict
            });

            // A fault inside one connection is a dropped request, nothing more
            tokio::spawn(async move {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        error!("[CMD] Handler for {} panicked, request dropped", addr);
                    } else {
                        warn!("[CMD] Handler for {} cancelled: {}", addr, e);
                    }
                }
            });
        }
    }
}

/// Serve one connection: read, acknowledge, close, then act
pub async fn serve_connection<S>(
    mut stream: S,
    handler: &CommandHandler,
    scheduler: &UnlockHandle,
    read_timeout: Duration,
) -> Verdict
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_request(&mut stream, read_timeout).await;

    if let Err(e) = stream.write_all(ACK_RESPONSE).await {
        debug!("[CMD] Failed to write response: {}", e);
    }
    if let Err(e) = stream.shutdown().await {
        debug!("[CMD] Failed to close connection: {}", e);
    }
    drop(stream);

    let verdict = match request {
        Ok(request) => {
            debug!("[CMD] {} {} ({} byte body)", request.method, request.target, request.body.len());
            handler.handle(&request)
        }
        Err(reason) => Verdict::Dropped(reason),
    };

    match &verdict {
        Verdict::Unlock(duration) => {
            info!("[CMD] Authenticated unlock request for {}", duration);
            if let Err(e) = scheduler.extend(*duration).await {
                error!("[CMD] Failed to schedule unlock: {}", e);
            }
        }
        Verdict::Dropped(reason) => {
            warn!("[CMD] Request dropped ({})", reason);
        }
    }

    verdict
}

async fn read_request<S>(stream: &mut S, read_timeout: Duration) -> Result<RawRequest, DropReason>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + read_timeout;
    let mut decoder = RequestDecoder::new();
    let mut buf = vec![0u8; 1024];

    loop {
        match timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) => {
                return Err(DropReason::Unreadable(format!(
                    "no complete request within {:?} ({} bytes)",
                    read_timeout,
                    decoder.buffer_len()
                )));
            }
            Ok(Err(e)) => return Err(DropReason::Unreadable(e.to_string())),
            Ok(Ok(0)) => return decoder.finish().map_err(DropReason::Malformed),
            Ok(Ok(n)) => {
                decoder.extend(&buf[..n]);
                match decoder.decode_next() {
                    Ok(Some(request)) => return Ok(request),
                    Ok(None) => {}
                    Err(e) => return Err(DropReason::Malformed(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedActuator;
    use crate::command::SharedSecret;
    use crate::scheduler::UnlockScheduler;
    use door_shared::{CodecError, UnlockDuration};
    use tokio::io::duplex;
    use tokio::net::TcpStream;

    const PSK: &str = "access-front-door-psk";

    fn handler() -> CommandHandler {
        CommandHandler::new(SharedSecret::new(PSK).unwrap(), UnlockDuration::default())
    }

    fn post(body: &str) -> Vec<u8> {
        format!(
            "POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .into_bytes()
    }

    /// Send `raw` over an in-memory stream; returns the response and verdict
    async fn exchange(raw: &[u8], scheduler: &UnlockHandle) -> (Vec<u8>, Verdict) {
        let (mut client, server) = duplex(4096);
        let handler = handler();
        let scheduler = scheduler.clone();
        let task = tokio::spawn(async move {
            serve_connection(server, &handler, &scheduler, DEFAULT_READ_TIMEOUT).await
        });

        client.write_all(raw).await.unwrap();
        client.shutdown().await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        (response, task.await.unwrap())
    }

    #[tokio::test]
    async fn test_authenticated_request_unlocks() {
        let actuator = Arc::new(SimulatedActuator::new());
        let (scheduler, _task) = UnlockScheduler::spawn(actuator.clone());

        let (response, verdict) = exchange(&post(&format!("psk={}&duration=5", PSK)), &scheduler).await;

        assert_eq!(response, ACK_RESPONSE);
        assert_eq!(verdict, Verdict::Unlock(UnlockDuration::clamped(5)));
        assert!(scheduler.snapshot().await.unwrap().is_unlocked());
        assert!(actuator.is_engaged());
    }

    #[tokio::test]
    async fn test_rejected_requests_get_identical_response() {
        let actuator = Arc::new(SimulatedActuator::new());
        let (scheduler, _task) = UnlockScheduler::spawn(actuator.clone());
        let before = scheduler.snapshot().await.unwrap();

        let attempts: Vec<Vec<u8>> = vec![
            post("psk=wrong&duration=5"),
            post("duration=5"),
            post("no parameters here"),
            b"psk=access-front-door-psk&duration=5".to_vec(),
            b"POST / HTTP/1.1\r\n\r\npsk=access-front-door-psk".to_vec(),
            Vec::new(),
        ];

        for raw in attempts {
            let (response, verdict) = exchange(&raw, &scheduler).await;
            assert_eq!(response, ACK_RESPONSE);
            assert!(matches!(verdict, Verdict::Dropped(_)));
        }

        assert_eq!(scheduler.snapshot().await.unwrap(), before);
        assert!(!actuator.is_engaged());
    }

    #[tokio::test]
    async fn test_missing_content_length_is_malformed() {
        let (scheduler, _task) = UnlockScheduler::spawn(Arc::new(SimulatedActuator::new()));
        let (_, verdict) = exchange(b"POST / HTTP/1.1\r\n\r\npsk=x", &scheduler).await;
        assert_eq!(
            verdict,
            Verdict::Dropped(DropReason::Malformed(CodecError::MissingContentLength))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_times_out() {
        let (scheduler, _task) = UnlockScheduler::spawn(Arc::new(SimulatedActuator::new()));
        let (mut client, server) = duplex(4096);
        let handler = handler();
        let task = tokio::spawn(async move {
            serve_connection(server, &handler, &scheduler, DEFAULT_READ_TIMEOUT).await
        });

        // Half a request, then silence
        client.write_all(b"POST / HTTP/1.1\r\nContent-Len").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, ACK_RESPONSE);
        assert!(matches!(
            task.await.unwrap(),
            Verdict::Dropped(DropReason::Unreadable(_))
        ));
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let actuator = Arc::new(SimulatedActuator::new());
        let (scheduler, _task) = UnlockScheduler::spawn(actuator.clone());
        let server = CommandServer::bind("127.0.0.1:0", handler(), scheduler.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        // Rejected first, then accepted: same bytes back both times
        for body in ["psk=nope".to_string(), format!("psk={}&duration=3", PSK)] {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&post(&body)).await.unwrap();
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await.unwrap();
            assert_eq!(response, ACK_RESPONSE);
        }

        // The verdict is acted on after the connection closes
        let mut unlocked = false;
        for _ in 0..100 {
            if scheduler.snapshot().await.unwrap().is_unlocked() {
                unlocked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(unlocked);
        assert!(actuator.is_engaged());
    }

    /// Time for an unlock to be answered while a silent client holds a slot
    async fn unlock_behind_silent_client(max_connections: usize) -> Duration {
        let (scheduler, _task) = UnlockScheduler::spawn(Arc::new(SimulatedActuator::new()));
        let server = CommandServer::bind("127.0.0.1:0", handler(), scheduler.clone())
            .await
            .unwrap()
            .with_read_timeout(Duration::from_millis(400))
            .with_max_connections(max_connections);
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let _silent = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&post(&format!("psk={}&duration=3", PSK))).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, ACK_RESPONSE);
        started.elapsed()
    }

    #[tokio::test]
    async fn test_connection_cap_queues_clients() {
        assert!(unlock_behind_silent_client(1).await >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_spare_connection_slot_serves_immediately() {
        assert!(unlock_behind_silent_client(2).await < Duration::from_millis(250));
    }
}
