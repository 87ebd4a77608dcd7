//! Ledger access for the constant-product AMM client.
//!
//! - [`node`]: the [`LedgerNode`] seam and its typed calls
//! - [`abi`]: call-data encoding for the exchange contracts
//! - [`json_rpc`]: HTTP JSON-RPC implementation
//! - [`memory`]: in-memory exchange deployment for tests and demos
//! - [`contracts`]: per-chain contract addresses

pub mod abi;
pub mod contracts;
pub mod json_rpc;
pub mod memory;
pub mod node;

pub use contracts::{ContractAddresses, default_tokens};
pub use json_rpc::JsonRpcNode;
pub use memory::MemoryLedger;
pub use node::{
    CallOutput, ContractWrite, LedgerNode, NodeError, ReadCall, TxHash, TxReceipt, WriteCall,
};
