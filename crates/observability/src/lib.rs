//! Shared tracing/logging setup for every hhrec process.

pub mod tracing;

pub use crate::tracing::{LogFormat, init, init_with};
