//! Error types for the ground-station receive pipeline.
//!
//! Hot-path operations (packet handling, slice advancement, profile confirmations)
//! never return these errors; they report outcomes instead. `LinkError` covers the
//! edges of the system: decoding untrusted datagrams, loading configuration, and
//! attaching to or creating the shared telemetry region.
//!
//! ## Error Categories
//!
//! - **Region Errors**: creating, mapping or attaching the shared telemetry region
//! - **Layout Errors**: a region written with an incompatible layout version
//! - **Decode Errors**: short or inconsistent packet buffers
//! - **Config Errors**: unreadable or invalid station configuration
//! - **Link Errors**: outbound sends that could not be queued
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use groundlink::LinkError;
//!
//! let error = LinkError::send_failed("outbound queue full");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ground-station operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for ground-station operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Telemetry region error: {path}")]
    Region {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Telemetry layout version mismatch: expected {expected}, found {found}")]
    Version { expected: u32, found: u32 },

    #[error("Region access out of bounds at offset {offset:#x}")]
    Memory { offset: usize },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Configuration error: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Outbound send failed: {reason}")]
    Send { reason: String },

    #[error("Telemetry snapshot was torn after {attempts} attempts")]
    TornSnapshot { attempts: u32 },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Region { .. } => false,
            LinkError::Version { .. } => false,
            LinkError::Memory { .. } => false,
            LinkError::Decode { .. } => false,
            LinkError::Config { .. } => false,
            LinkError::Send { .. } => true,
            LinkError::TornSnapshot { .. } => true,
            LinkError::Io(_) => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::Region { .. } => vec![
                "Check that the shared memory directory exists and is writable",
                "Verify no other station process owns the region",
                "Remove stale region files left by a crashed process",
            ],
            LinkError::Version { .. } => vec![
                "Restart readers against the current station build",
                "Attach using the region name for this layout version",
            ],
            LinkError::Memory { .. } => vec![
                "Check that the region file was not truncated",
                "Recreate the region from the owning process",
            ],
            LinkError::Decode { .. } => vec![
                "Verify the vehicle firmware speaks the same packet format",
                "Check for truncated datagrams on the radio interface",
            ],
            LinkError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare values against the documented defaults",
            ],
            LinkError::Send { .. } => vec![
                "Check that the radio transmit task is running",
                "Increase the outbound queue capacity",
            ],
            LinkError::TornSnapshot { .. } => vec![
                "Retry the snapshot read",
                "Lower the telemetry read frequency",
            ],
            LinkError::Io(_) => vec![
                "Check the underlying socket or file",
                "Retry the operation",
            ],
        }
    }

    /// Helper constructor for decode errors on short or inconsistent buffers.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for region errors with path context.
    pub fn region_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LinkError::Region { path: path.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        LinkError::Config { reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors with source.
    pub fn config_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Config { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for outbound send failures.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        LinkError::Send { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn messages_carry_their_context(
            context in "[a-z ]{1,20}",
            details in ".*",
            offset in 0usize..0x10000usize,
            expected in 1u32..10u32,
            found in 1u32..10u32,
          ) {
            let decode = LinkError::decode(context.clone(), details.clone());
            prop_assert!(decode.to_string().contains(&context));
            prop_assert!(decode.to_string().contains(&details));

            let memory = LinkError::Memory { offset };
            prop_assert!(
              memory.to_string().contains(&format!("{:#x}", offset)),
              "offset {:#x} missing from message",
              offset
            );

            let version = LinkError::Version { expected, found };
            let msg = version.to_string();
            prop_assert!(msg.contains(&expected.to_string()));
            prop_assert!(msg.contains(&found.to_string()));
          }

          #[test]
          fn config_source_chain_is_preserved(base in "[a-z]{1,16}") {
            let source: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base.clone()));
            let err = LinkError::config_with_source("bad file", source);

            let inner = std::error::Error::source(&err).map(|s| s.to_string());
            prop_assert_eq!(inner, Some(base));
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::send_failed("queue full");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification() {
        assert!(LinkError::send_failed("full").is_retryable());
        assert!(LinkError::TornSnapshot { attempts: 4 }.is_retryable());
        assert!(!LinkError::Version { expected: 1, found: 2 }.is_retryable());
        assert!(!LinkError::decode("video header", "short").is_retryable());

        let memory = LinkError::Memory { offset: 16 };
        for suggestion in memory.recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
    }

    #[test]
    fn io_errors_convert() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "bound");
        let err: LinkError = io_err.into();
        assert!(matches!(err, LinkError::Io(_)));
    }
}
