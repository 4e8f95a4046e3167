// crates/edgegate-config/src/lib.rs
// ============================================================================
// Module: EdgeGate Config Library
// Description: Configuration loading and validation for the EdgeGate runtime.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with environment-variable
//! overrides for the secrets and endpoints deployments inject. Missing or
//! invalid configuration fails closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::EdgeGateConfig;
pub use config::ObjectStoreConfig;
pub use config::SigningConfig;
