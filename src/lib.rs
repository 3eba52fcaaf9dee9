//! # minidsm
//!
//! Distributed shared objects kept coherent by a central coordinator:
//! - Single writer / multiple readers per object
//! - Lazy, cache-first access on every server node
//! - Invalidation callbacks with a bounded timeout
//! - Snapshot after every change, restore + liveness reconciliation on restart
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │         Coordinator          │
//!                │  ids · names · lock records  │
//!                │  snapshot after every change │
//!                └──────┬──────────────▲────────┘
//!        invalidations  │              │ allocate / register / lookup
//!        (callbacks)    │              │ acquire_read / acquire_write
//!          ┌────────────┴───┐     ┌────┴───────────┐
//!          │ Server node 1  │     │ Server node 2  │
//!          │ local cache    │     │ local cache    │
//!          └────────────────┘     └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minidsm-coord serve \
//!   --bind 0.0.0.0:1224 \
//!   --snapshot ./coord-data/status.snap \
//!   --restore prompt
//! ```
//!
//! ### Start a server node with the shared-text console
//! ```bash
//! minidsm-node run --coordinator http://localhost:1224
//! > create sentence hello
//! > write sentence hello world
//! > read sentence
//! ```
//!
//! ### Inspect
//! ```bash
//! minidsm status --coordinator http://localhost:1224
//! minidsm inspect --snapshot ./coord-data/status.snap
//! ```

pub mod common;
pub mod coordinator;
pub mod node;

// Re-export commonly used types
pub use common::{Config, Error, LockGrade, ObjectId, Payload, Result, ServerId};
pub use coordinator::{Coordinator, CoordinatorServer};
pub use node::{LocalCluster, NodeServer, ObjectHandle, ServerNode};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
