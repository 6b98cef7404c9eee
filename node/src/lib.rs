//! The Kestrel full node — wires the consensus-coordination subsystems
//! together over TCP peer sessions.
//!
//! - Accepts peer connections and runs one reader and one writer task per
//!   peer.
//! - Demultiplexes wire frames into the chain-sync handlers and the
//!   election / big-period state machines.
//! - Runs the coordinator task that drives elections, period sync, and
//!   block packaging on the elected node.

pub mod ballot_backend;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod node;
pub mod session;
pub mod shutdown;
pub mod sync_server;

pub use config::{DelegatorEntry, NodeConfig};
pub use error::NodeError;
pub use node::KestrelNode;
pub use shutdown::ShutdownController;
