//! Network-management capability.

use std::future::Future;
use std::pin::Pin;

use hvacvibe_protocol::{NetworkDescriptor, WifiStatus};

/// A boxed future returned by [`NetworkManager`] methods.
pub type NetworkFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by network operations. The display text is what the
/// viewer sees in `cmd_result.message`.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("{0}")]
    Failed(String),

    #[error("Connection timed out")]
    Timeout,

    #[error("network manager unavailable: {0}")]
    Unavailable(String),
}

/// Wireless network scan, join and status.
pub trait NetworkManager: Send + Sync + 'static {
    /// Visible networks, strongest first, one entry per SSID.
    fn scan(&self) -> NetworkFuture<'_, Result<Vec<NetworkDescriptor>, NetworkError>>;

    /// Joins `ssid`. `Ok` carries the success message.
    fn connect<'a>(
        &'a self,
        ssid: &'a str,
        password: &'a str,
    ) -> NetworkFuture<'a, Result<String, NetworkError>>;

    /// Current link. Failures report a disconnected status.
    fn status(&self) -> NetworkFuture<'_, WifiStatus>;
}
