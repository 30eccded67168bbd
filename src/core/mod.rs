pub mod batch;
pub mod checksum;
pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod remote;
pub mod scanner;

pub use batch::{
    BatchProgress, BatchSummary, Direction, FailedRecord, ProgressUpdate, TransferBatch,
    TransferRecord, TransferStatus,
};
pub use checksum::{calculate_hash, hash_file};
pub use command::RemoteCommandRunner;
pub use dispatcher::{default_workers, TransferDispatcher};
pub use engine::{RunEngine, RunReport};
pub use remote::{interpolate, ConnectionDescriptor};
pub use scanner::{FileFilter, LocalCataloger, RemoteCataloger, ScanConfig};
