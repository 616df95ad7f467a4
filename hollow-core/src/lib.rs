//! Hollow core library — domain types, setting tree, depot capability.
//!
//! Public API surface:
//! - [`types`] — newtypes, sync options/results, populate metadata
//! - [`settings`] — [`SettingNode`], [`SettingManager`], XML/JSON forms
//! - [`depot`] — [`DepotClient`]/[`DepotFactory`] capability + memory backend
//! - [`error`] — [`SettingError`], [`DepotError`]

pub mod depot;
pub mod error;
pub mod settings;
pub mod types;

pub use depot::{DepotClient, DepotConfig, DepotFactory, DepotRevision};
pub use error::{DepotError, SettingError};
pub use settings::{SettingManager, SettingNode};
pub use types::{
    DepotServer, DepotSyncOptions, DepotSyncResult, DepotUser, DepotWorkspace, ExecutionContext,
    FilePopulateInfo, FlushType, Identity, SyncAction, SyncFlags, SyncMethod, SyncModification,
    SyncStatus,
};
