//! WARDEN Core Types
//!
//! This crate contains pure types shared by the policy staging and dispatch crates.
//! Nothing here touches the filesystem or spawns processes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

// Re-exports
pub use error::{CoreError, CoreResult};
