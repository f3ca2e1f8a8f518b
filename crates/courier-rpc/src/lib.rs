//! # Courier RPC - Correlation-Based Request/Response
//!
//! Request/response over a broker that only knows one-way messages. Each
//! request carries a fresh correlation id and the name of a private reply
//! queue; replies are matched back to the waiting caller by that id.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ send_request ┌─────────────────────┐ publish ┌──────────┐
//! │  Caller   │ ───────────► │      RpcClient      │ ──────► │  Broker  │
//! └─────▲─────┘              │ ┌─────────────────┐ │         └────┬─────┘
//!       │ RpcFuture          │ │CorrelationRegist│ │              │ reply
//!       └────────────────────┤ └────────▲────────┘ │              ▼
//!                            │ ResponseDispatcher ◄┼──── reply queue
//!                            └─────────────────────┘
//! ```
//!
//! ## Response modes
//!
//! - [`ResponseMode::Exception`]: non-OK replies resolve as [`RpcError::Remote`]
//! - [`ResponseMode::Raw`]: every reply resolves as an [`RpcResponse`]
//!
//! ## Usage
//!
//! ```ignore
//! let client = RpcClient::new(channel, Route::queue("math"), RpcConfig::default()).await?;
//! let response = client.send_request(&json!({"op": "add", "a": 1, "b": 2})).await?.await?;
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod config;
pub mod correlation;
mod dispatcher;
pub mod error;
pub mod future;
pub mod registry;
pub mod response;

pub use client::RpcClient;
pub use config::{ResponseMode, RpcConfig};
pub use correlation::CorrelationId;
pub use error::{RegistryError, RpcError};
pub use future::{PendingCall, RpcFuture, RpcResult};
pub use registry::{sweep_expired, CorrelationRegistry, RegistryStats};
pub use response::{
    reply_properties, ResponseStatus, RpcResponse, EXCEPTION_MSG_KEY, EXCEPTION_NAME_KEY,
};
