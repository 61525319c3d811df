//! # granite-common
//!
//! Shared building blocks for the Granite storage engine: strongly-typed
//! identifiers, system-wide constants, and the opaque transaction token
//! passed through index operations.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// System-wide constants
pub mod constants;

/// Identifier and token types
pub mod types;
