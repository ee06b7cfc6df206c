//! The `utils` module provides a collection of utility functions and common
//! definitions used across the adapter core.
//!
//! It centralizes the error taxonomy and the tracing initialization so every
//! component reports failures and logs the same way.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
