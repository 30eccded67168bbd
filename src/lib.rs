pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod transport;

pub use config::RunConfig;
pub use crate::core::{
    ConnectionDescriptor, Direction, RunEngine, RunReport, TransferBatch, TransferDispatcher,
    TransferRecord,
};
pub use error::{Error, Result};
pub use transport::{ProcessTransport, Transport};
