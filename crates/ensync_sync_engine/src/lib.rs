//! # ensync Sync Engine
//!
//! Drives sync rounds between a local replica and a remote sync target.
//!
//! This crate provides:
//! - [`Synchronizer`]: one push-then-pull round per call
//! - [`SyncTarget`]: the contract of the remote replica
//! - [`HttpSyncTarget`] over any [`HttpClient`], plus an in-process [`LoopbackClient`]
//! - Cancellation tokens checked between documents
//! - Per replica-pair locking of rounds
//! - Caller-side retry with exponential backoff
//!
//! ## Architecture
//!
//! A round pushes first, then pulls:
//! 1. Compare transaction ids on both sides to detect a rebuilt replica
//! 2. Push local changes the target has not seen, each document encrypted
//! 3. Pull target changes after the checkpoint, each envelope verified
//! 4. Commit the pull checkpoint
//!
//! ## Key Invariants
//!
//! - Content leaves this replica only inside an encrypted envelope
//! - The checkpoint never points past a change that was not fully applied
//! - A failed round commits nothing; a cancelled pull commits only what it applied
//! - Re-running an interrupted round converges to the uninterrupted result
//! - At most one round runs per (local, target) pair

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod error;
mod http;
mod lock;
mod retry;
mod synchronizer;
mod target;

pub use cancel::CancelToken;
pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpSyncTarget, LoopbackClient};
pub use lock::{PairGuard, PairLocks};
pub use retry::retry_sync;
pub use synchronizer::{ConflictReport, ConflictSide, SyncReport, SyncStats, Synchronizer};
pub use target::SyncTarget;
