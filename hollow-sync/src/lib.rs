//! Workspace sync engine: placeholder lifecycle, depot connection cache,
//! bounded worker fan-out and the request orchestrator.

pub mod cache;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod placeholder;
pub mod workers;

pub use cache::{ConnectionCache, ConnectionKey, ConnectionLease};
pub use error::SyncError;
pub use identity::{IdentityContext, ImpersonationScope};
pub use orchestrator::{
    NullProgress, ProgressSink, ReconfigureTarget, SyncOrchestrator, SyncTunables,
};
pub use placeholder::{FileState, PopulateStore, RenameTunables};
