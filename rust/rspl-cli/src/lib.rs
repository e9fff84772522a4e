//! RSPL CLI library.
//!
//! Shared pieces of the `rsplc` binary.

pub mod colors;
pub mod config;
