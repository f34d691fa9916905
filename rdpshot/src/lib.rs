//! # rdpshot: command-line front-end
//!
//! Reads the TOML configuration and turns it into the session settings
//! that `rdpshot-core` captures with.

pub mod config;
