//! Network link trait abstraction for pluggable join backends

use anyhow::Result;
use async_trait::async_trait;

/// A network interface the device must join before serving commands
#[async_trait]
pub trait NetworkLink: Send + Sync {
    /// Whether the link is currently up
    async fn is_connected(&self) -> bool;

    /// Start joining the network; completion is observed via `is_connected`
    async fn begin_join(&self) -> Result<()>;

    /// Give up on an in-progress join and take the interface down
    async fn abort_join(&self);

    /// Human-readable name for this link
    fn name(&self) -> &'static str;
}
