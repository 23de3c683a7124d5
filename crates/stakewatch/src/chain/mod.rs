//! Chain access: JSON-RPC client and custody-history fetching.

pub mod fetch;
pub mod rpc;

pub use fetch::{fetch_custody_history, CancelToken, FetchConfig, FetchError, FetchOutcome};
pub use rpc::{ChainRpc, HttpRpcClient, RpcConfig, RpcError};
