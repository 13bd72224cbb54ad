//! Configuration for imgbuild
//!
//! This crate handles the global configuration file
//! (`~/.config/imgbuild/config.toml`): which container backend to talk to
//! and the defaults applied to every build.

mod error;
mod global;

pub use error::*;
pub use global::*;
