//! Shared infrastructure for the Vireo streaming client.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;

pub use error::{Error, Result};
pub use helpers::now_us;
