// crates/edgegate-backend/src/lib.rs
// ============================================================================
// Module: EdgeGate Backend Library
// Description: Concrete compute-hub adapter over HTTP.
// Purpose: Implement the Backend seam against the vendor REST surface.
// Dependencies: crate::hub
// ============================================================================

//! ## Overview
//! The hub client is the only code in EdgeGate that speaks the vendor
//! protocol. Everything it returns is opaque bytes or minimal typed handles;
//! interpretation happens in the core through probe-proven paths.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod hub;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hub::HubClient;
pub use hub::HubClientConfig;
pub use hub::HubConnector;
