//! Startup registration with the hub

use super::client::HubNotifier;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Announce this device in the background.
///
/// The task resolves to the hub's status code, or `None` if the hub could not
/// be reached. Nothing waits on it before serving requests.
pub fn spawn_registration<H>(hub: Arc<H>, device_id: String) -> JoinHandle<Option<u16>>
where
    H: HubNotifier + ?Sized + 'static,
{
    tokio::spawn(async move {
        match hub.register_device(&device_id).await {
            Ok(status) if (200..300).contains(&status) => {
                info!("[HUB] Registered as {} ({})", device_id, status);
                Some(status)
            }
            Ok(status) => {
                warn!("[HUB] Registration of {} rejected ({})", device_id, status);
                Some(status)
            }
            Err(e) => {
                error!("[HUB] Registration failed: {}", e);
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedActuator;
    use crate::command::{CommandHandler, CommandServer, SharedSecret};
    use crate::hub::HubClient;
    use crate::scheduler::UnlockScheduler;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use door_shared::UnlockDuration;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::Instant;

    const PSK: &str = "access-front-door-psk";

    struct FixedHub(Option<u16>);

    #[async_trait]
    impl HubNotifier for FixedHub {
        async fn register_device(&self, _id: &str) -> Result<u16> {
            self.0.ok_or_else(|| anyhow!("hub unreachable"))
        }
    }

    #[tokio::test]
    async fn test_registration_outcomes() {
        let ok = spawn_registration(Arc::new(FixedHub(Some(200))), "door".into());
        let rejected = spawn_registration(Arc::new(FixedHub(Some(403))), "door".into());
        let failed = spawn_registration(Arc::new(FixedHub(None)), "door".into());

        assert_eq!(ok.await.unwrap(), Some(200));
        assert_eq!(rejected.await.unwrap(), Some(403));
        assert_eq!(failed.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_silent_hub_does_not_delay_unlocks() {
        let hub_timeout = Duration::from_secs(3);

        // Accepts the registration connection and never answers
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub_addr = silent.local_addr().unwrap().to_string();
        let _silent_task = tokio::spawn(async move {
            let (socket, _) = silent.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let started = Instant::now();
        let secret = SharedSecret::new(PSK).unwrap();
        let hub = Arc::new(HubClient::new(hub_addr, secret.clone()).with_timeout(hub_timeout));
        let registration = spawn_registration(hub, "access-front-door".into());

        let actuator = Arc::new(SimulatedActuator::new());
        let (scheduler, _task) = UnlockScheduler::spawn(actuator.clone());
        let handler = CommandHandler::new(secret, UnlockDuration::default());
        let server = CommandServer::bind("127.0.0.1:0", handler, scheduler.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let body = format!("psk={}&duration=5", PSK);
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", body.len(), body).as_bytes(),
            )
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();

        let mut unlocked = false;
        while started.elapsed() < hub_timeout {
            if scheduler.snapshot().await.unwrap().is_unlocked() {
                unlocked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(unlocked);
        assert!(actuator.is_engaged());
        assert!(started.elapsed() < hub_timeout);
        assert!(!registration.is_finished());

        // The registration still gives up on its own
        assert_eq!(registration.await.unwrap(), None);
    }
}
