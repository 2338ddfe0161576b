pub mod config;
pub mod machine;
pub mod types;

#[cfg(feature = "client")]
pub mod http;
#[cfg(feature = "client")]
pub mod poller;
#[cfg(feature = "client")]
pub mod session;
#[cfg(feature = "client")]
pub mod socket;

pub use config::SocketConfig;
pub use machine::{Command, ConnectionMachine};
pub use types::{CloseKind, ConnectionPhase, SocketEvent};

#[cfg(feature = "client")]
pub use http::{CredentialSource, PanelApi, ResourceSource};
#[cfg(feature = "client")]
pub use poller::{ResourcePoller, RowUpdate};
#[cfg(feature = "client")]
pub use session::{ServerSession, SessionOptions};
#[cfg(feature = "client")]
pub use socket::{SocketClient, SocketHandle};
