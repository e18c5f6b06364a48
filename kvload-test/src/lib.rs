//! Test utilities for kvload.
//!
//! This crate provides utilities to facilitate testing load runs without an external key-value
//! server. See the modules for all available utilities.

pub mod server;
pub mod tracing;
