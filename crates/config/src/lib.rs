//! Configuration types for the action orchestration layer.
//!
//! This crate provides:
//! - Chain configurations (mainnet and testnet sets)
//! - Governance contract addresses per chain
//! - Explorer link building

pub mod network;

pub use network::{ChainConfig, ConfigError, NetworkConfig, NetworkConfigBuilder, NetworkType};
