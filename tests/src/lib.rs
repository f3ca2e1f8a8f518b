//! # Courier Test Suite
//!
//! Cross-crate scenarios run against the in-memory broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Math service hosted on a MessageWorker, broker setup
//! └── integration/
//!     ├── rpc_flows.rs   # Client ↔ service request/response
//!     └── recovery.rs    # Broker drops, resubscribe, retry exhaustion
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p courier-tests
//! cargo test -p courier-tests integration::recovery::
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod integration;
