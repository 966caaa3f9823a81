//! Store-and-forward replication of readings to a remote system.

pub mod pending;
pub mod publisher;
pub mod remote;

pub use pending::PendingQueue;
pub use publisher::{
    HttpPublisher, HttpSettings, MqttPublisher, MqttSettings, NoopPublisher, PublishError,
    PublishFuture, PublishRecord, Publisher, PublisherSettings, from_settings,
};
pub use remote::{RemoteSync, SyncConfig, SyncStatus};
