//! Contract bindings for the on-chain adapters.
//!
//! This crate consolidates the Solidity interfaces the action adapters talk to:
//! - ERC20 tokens (balances and approvals)
//! - Restake automation contracts (deposit and refund)
//! - Governor Bravo style governance (proposal state and voting)
//!
//! All bindings are generated using alloy's `sol!` macro.

pub mod automate;
pub mod governor;
pub mod token;
