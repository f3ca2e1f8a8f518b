//! # Courier Worker - Reconnecting Message Consumer
//!
//! Packages a [`MessageHandler`](courier_transport::MessageHandler) with the
//! broker plumbing needed to keep it consuming.
//!
//! ```text
//! start() ──► Subscribed ──shutdown──► Reconnecting ──ok──► Subscribed
//!                                           │
//!                                           └── budget spent ──► Failed
//! ```
//!
//! The worker registers its [`Reconnector`] on every connection it opens. A
//! broker-side shutdown re-runs the subscribe sequence with bounded
//! exponential backoff ([`ReconnectPolicy`], default 10 attempts).

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod policy;
pub mod reconnector;
pub mod worker;

pub use error::WorkerError;
pub use policy::ReconnectPolicy;
pub use reconnector::{ReconnectHandler, ReconnectState, Reconnector};
pub use worker::{MessageWorker, WorkerReconnect, WorkerState};
