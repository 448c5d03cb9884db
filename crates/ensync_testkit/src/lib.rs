//! # ensync Testkit
//!
//! Test utilities for ensync.
//!
//! This crate provides:
//! - Fixtures for local replicas and sync servers
//! - Sync targets that interrupt rounds at chosen points
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ensync_testkit::prelude::*;
//!
//! #[test]
//! fn test_sync() {
//!     let server = TestServer::memory();
//!     let replica = TestReplica::memory(&KeyMaterial::generate());
//!     replica.populate(10);
//!     replica.sync(&server.target("notes")).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod targets;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::targets::*;
    pub use ensync_core::crypto::KeyMaterial;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use targets::*;
