#![forbid(unsafe_code)]
//! Hashing, filesystem, archive, and process helpers for Slipway.

pub mod archive;
pub mod download;
pub mod error;
pub mod fs;
pub mod hash;
pub mod process;
