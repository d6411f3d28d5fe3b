// src/lib.rs

//! Mod set updater
//!
//! Resolves every mod jar in a directory against the Modrinth registry and
//! moves the set to a newer game version, one backed-up file at a time.
//!
//! # Architecture
//!
//! - Identity by content: a jar is looked up by the SHA-512 of its bytes
//! - Bounded fan-out: one resolution task per jar on a capped worker pool
//! - Retry isolation: a transient failure only delays its own artifact
//! - Verified downloads: bytes reach the destination only after their
//!   digest matches the registry's
//! - Backup first: the live file is copied aside before it is replaced

pub mod artifact;
pub mod cache;
pub mod config;
mod error;
pub mod fingerprint;
pub mod registry;
pub mod resolver;
pub mod transaction;

pub use error::{Error, Result};
