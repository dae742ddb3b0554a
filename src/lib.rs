pub mod audio;
pub mod config;
pub mod error;
pub mod facade;
pub mod kernel;
pub mod logging;
pub mod modules;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod voice;

// Re-export the entry points most callers need
pub use error::{BridgeError, Result};
pub use facade::{Envelope, Facade, Request};
pub use kernel::PhaseController;
pub use modules::{Cube, ModuleClient, ModuleKind};
pub use transport::{Connection, TransportConfig};
