// crates/edgegate-core/src/core/identifiers.rs
// ============================================================================
// Module: EdgeGate Identifiers
// Description: Canonical opaque identifiers for EdgeGate records and runs.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! EdgeGate. Identifiers are opaque and serialize as strings. Validation is
//! handled at record or runtime boundaries rather than within these simple
//! wrappers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Declares a string-backed identifier newtype with the standard surface.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_id! {
    /// Workspace identifier; the tenant boundary every record carries.
    WorkspaceId
}

string_id! {
    /// Actor identifier recorded in audit events.
    ActorId
}

string_id! {
    /// Run identifier.
    RunId
}

string_id! {
    /// Pipeline identifier.
    PipelineId
}

string_id! {
    /// PromptPack logical identifier (versions are tracked separately).
    PromptPackId
}

string_id! {
    /// Content-addressed artifact identifier.
    ArtifactId
}

string_id! {
    /// Backend device identifier.
    DeviceId
}

string_id! {
    /// Signing key identifier recorded in bundle summaries.
    KeyId
}
