//! fieldsync-node — reference transports, configuration, and logging that
//! turn `fieldsync-core`'s pure engine into a runnable peer: an HTTP
//! rendezvous server and client (§6), a file-store transport, and the CLI
//! glue that wires them to a [`fieldsync_core::Engine`].

pub mod config;
pub mod server;
pub mod transport;

pub use config::{Command, Config};
pub use server::{build_router, AppState};
pub use transport::{FileStoreTransport, HttpTransport};
