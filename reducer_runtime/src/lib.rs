#![forbid(unsafe_code)]

//! Resumable reducer runtime.
//!
//! Wraps the reducer kernel with persistence, replay and block ingestion:
//! committed patches are appended to an operation log, and on restart a
//! reducer's tree is rebuilt from that log before streaming resumes.
//!
//! No reducer logic lives here; state transitions belong to the reducers.

pub mod blockstream;
pub mod config;
pub mod error;
pub mod operation_log;
pub mod proto_bridge;
pub mod proto_types;
pub mod replay;
pub mod runner;
pub mod store;

pub use blockstream::{BlockSource, StaticChain, StopHandle, StreamItem};
pub use config::RunnerConfig;
pub use error::{ConfigError, ReplayError, RuntimeError, StorageError, StreamError};
pub use operation_log::OperationLog;
pub use runner::{ReducerRunner, RunSummary};
pub use store::{Checkpoint, CheckpointStore, MemoryStore, StoredOperation};
