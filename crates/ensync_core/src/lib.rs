//! # ensync Core
//!
//! Storage side of an ensync replica.
//!
//! This crate provides:
//! - [`Replica`]: documents, conflict leaves and the generation log
//! - [`DocumentStore`]: the contract the synchronizer works against
//! - [`CheckpointStore`]: per-pair sync progress, in memory or on disk
//! - [`crypto`]: the codec that turns documents into encrypted envelopes
//!
//! ## Invariants
//!
//! - Every mutation consumes exactly one generation and one fresh transaction id
//! - A generation is journaled together with its document write, never apart
//! - Concurrent revisions are both retained; nothing is silently overwritten
//! - Re-applying known revisions changes nothing and consumes no generation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
pub mod crypto;
mod dir;
mod document;
mod error;
mod journal;
mod replica;
mod store;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::StoreConfig;
pub use dir::{checkpoints_path, ReplicaDir};
pub use document::{ChangeRecord, Content, Document, Leaf, Payload, PutResult};
pub use error::{CoreError, CoreResult};
pub use journal::{compute_crc32, FileJournal, Journal, MemoryJournal};
pub use replica::Replica;
pub use store::DocumentStore;
