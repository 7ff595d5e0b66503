//! Structural protection for Android packages.
//!
//! A [`Protector`] loads a package, runs the manifest, path, table and dex
//! confusers over it and writes the result with selected entries flagged as
//! encrypted.

pub mod archive;
pub mod arsc;
pub mod axml;
pub mod chunk;
pub mod config;
pub mod confuser;
pub mod cycle;
pub mod dex;
pub mod error;
pub mod package;
pub mod protect;
pub mod sink;

#[cfg(test)]
mod testutil;

pub use config::ProtectOptions;
pub use error::{Error, Result};
pub use protect::{Outcome, Protector};
