//! Link join, startup retry and background re-join loops

use super::traits::NetworkLink;
use door_shared::protocol;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Timing for joining the network
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long one join attempt may take before it is aborted
    pub connect_timeout: Duration,
    /// Interval between status polls while joining, and between health checks
    pub poll_interval: Duration,
    /// Pause between failed startup attempts
    pub retry_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(protocol::LINK_CONNECT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(protocol::LINK_POLL_INTERVAL_MS),
            retry_delay: Duration::from_millis(protocol::LINK_POLL_INTERVAL_MS),
        }
    }
}

/// Join the network, waiting at most `connect_timeout`.
///
/// Returns `true` immediately when the link is already up. On timeout the
/// join attempt is aborted and `false` is returned.
pub async fn connect<L>(link: &L, connect_timeout: Duration, poll_interval: Duration) -> bool
where
    L: NetworkLink + ?Sized,
{
    if link.is_connected().await {
        return true;
    }

    if let Err(e) = link.begin_join().await {
        warn!("[LINK] {} join could not start: {}", link.name(), e);
        link.abort_join().await;
        return false;
    }

    let wait_for_connected = async {
        while !link.is_connected().await {
            sleep(poll_interval).await;
        }
    };

    match timeout(connect_timeout, wait_for_connected).await {
        Ok(()) => true,
        Err(_) => {
            debug!("[LINK] {} join timed out after {:?}", link.name(), connect_timeout);
            link.abort_join().await;
            false
        }
    }
}

/// Block until the link is up, retrying forever
pub async fn connect_until_up<L>(link: &L, config: &LinkConfig)
where
    L: NetworkLink + ?Sized,
{
    let mut attempt: u32 = 1;
    loop {
        if connect(link, config.connect_timeout, config.poll_interval).await {
            info!("[LINK] Connected via {} (attempt {})", link.name(), attempt);
            return;
        }

        warn!("[LINK] Connecting... attempt {} failed", attempt);
        attempt = attempt.saturating_add(1);
        sleep(config.retry_delay).await;
    }
}

/// Watch the link and re-join whenever it drops. Never returns.
pub async fn stay_connected<L>(link: Arc<L>, config: LinkConfig)
where
    L: NetworkLink + ?Sized,
{
    loop {
        if !link.is_connected().await {
            warn!("[LINK] {} link down, re-joining", link.name());
            if connect(&*link, config.connect_timeout, config.poll_interval).await {
                info!("[LINK] {} link restored", link.name());
            } else {
                warn!("[LINK] {} re-join timed out", link.name());
            }
        }

        sleep(config.poll_interval).await;
    }
}
