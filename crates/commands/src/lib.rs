//! Viewer command routing and the collaborators behind it.
//!
//! [`CommandRouter`] is the live hub's [`Handler`](hvacvibe_live_hub::Handler):
//! it acknowledges slow commands, runs them off the viewer's read pump and
//! replies with `cmd_result`. Network management goes through
//! [`NetworkManager`]; pairing changes persist in a [`PairingRegistry`] and
//! setup-screen settings in [`ViewerSettings`].

pub mod network;
pub mod nmcli;
pub mod registry;
pub mod router;
pub mod settings;

pub use network::{NetworkError, NetworkFuture, NetworkManager};
pub use nmcli::Nmcli;
pub use registry::{PairingError, PairingRegistry};
pub use router::{CommandRouter, RouterConfig, run_status_loop};
pub use settings::{SettingsError, ViewerSettings};
