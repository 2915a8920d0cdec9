// Connection management module

mod cancel;
mod connect_worker;
pub mod manager;
pub mod state;
pub mod stats;
mod stream_worker;

pub use manager::ConnectionManager;
pub use state::{ConnectionEvent, ConnectionState, ConnectionStatus};
pub use stats::ConnectionStats;
