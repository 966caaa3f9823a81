//! Radio capability consumed by the producers and the discovery unit.
//!
//! The gateway does not drive a BLE stack directly; a backend implements
//! [`Radio`] and hands back a stream of [`LinkEvent`]s per connected sensor.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;

use hvacvibe_protocol::RadioDevice;

/// A boxed future returned by radio operations.
pub type RadioFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RadioError>> + Send + 'a>>;

/// Raw events delivered over a live sensor link.
///
/// The link is considered lost when the receiver yields `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A notification chunk of a vibration burst.
    VibrationChunk(Vec<u8>),
    /// An environment frame.
    Environment(Vec<u8>),
    /// Battery level, 0-100.
    Battery(u8),
    /// Signal strength in dBm.
    Rssi(i16),
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("radio unavailable: {0}")]
    Unavailable(String),

    #[error("operation timed out")]
    Timeout,
}

/// Radio backend.
///
/// `scan` reports every advertising device; name filtering happens in the
/// discovery unit.
pub trait Radio: Send + Sync + 'static {
    fn scan(&self, duration: Duration) -> RadioFuture<'_, Vec<RadioDevice>>;

    fn pair<'a>(&'a self, address: &'a str) -> RadioFuture<'a, ()>;

    fn unpair<'a>(&'a self, address: &'a str) -> RadioFuture<'a, ()>;

    /// Opens a link to `address` and returns its event stream.
    fn connect<'a>(&'a self, address: &'a str) -> RadioFuture<'a, mpsc::Receiver<LinkEvent>>;
}
