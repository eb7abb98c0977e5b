pub mod backoff;
mod conflict;
pub mod engine;
pub mod local;
pub mod paths;
pub mod remote;
pub mod transfer;

pub use engine::{EngineError, SyncEngine, SyncError, SyncReport};
pub use local::LocalFs;
pub use remote::{DriveRemote, Remote, RemoteError};
