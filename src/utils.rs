//! Utility functions shared by the runners.
//!

use anyhow::Result;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Read an entire [`Bytes`] slice into a [`String`].
///
/// Returns an error if the slice contains invalid UTF-8.
pub fn string_from_bytes(buf: Bytes) -> Result<String> {
    Ok(String::from_utf8(buf.as_ref().into())?)
}

/// Nanoseconds since the Unix epoch; 0 if the clock is before it.
pub fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
