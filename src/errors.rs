// src/errors.rs

use crate::types::conversions::ConversionError;
use std::time::Duration;

/// Errors surfaced by the proxy resolution and batched read pipeline.
///
/// A resolver that finds no matching storage-slot convention is *not* an
/// error; see [`crate::proxy_resolver::ImplementationRecord::NotAProxy`].
#[derive(Debug, thiserror::Error)]
pub enum LensError {
    /// The remote service could not be reached or answered with garbage.
    #[error("{service} transport error: {reason}")]
    Transport {
        service: &'static str,
        reason: String,
    },

    /// The service answered but had no usable interface (unverified contract, empty ABI).
    #[error("no usable interface for {address}: {reason}")]
    Lookup { address: String, reason: String },

    /// The payload was well-formed at the envelope level but could not be decoded.
    #[error("malformed payload: {0}")]
    Decode(String),

    /// The chain reader failed (transport fault, revert, malformed address).
    #[error("chain read on {address} failed: {reason}")]
    Chain { address: String, reason: String },

    #[error("method `{method}` is not part of the interface bound to {address}")]
    UnknownMethod { address: String, method: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("{operation} on {address} did not complete within {limit:?}")]
    Timeout {
        operation: String,
        address: String,
        limit: Duration,
    },

    /// One element of an all-or-nothing batch failed; the whole batch is aborted.
    #[error("batch element #{index} ({address}) failed: {source}")]
    Batch {
        index: usize,
        address: String,
        #[source]
        source: Box<LensError>,
    },

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl LensError {
    /// Unwraps `Batch` layers down to the element error that caused them.
    pub fn root(&self) -> &LensError {
        match self {
            LensError::Batch { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, LensError>;
