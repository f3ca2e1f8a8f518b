//! Cross-crate integration scenarios.

mod recovery;
mod rpc_flows;
