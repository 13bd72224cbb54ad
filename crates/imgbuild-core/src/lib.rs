//! Core logic for imgbuild
//!
//! This crate provides:
//! - Build orchestration: streaming a build context to a backend and
//!   running caller hooks with exactly-once success/failure semantics
//! - Progress feed parsing into progress text, layer ids and base images
//! - Build context assembly from a directory

mod builder;
mod context;
mod error;
mod extract;
mod hooks;
mod latch;
mod parser;
mod session;
mod stream;

pub use builder::*;
pub use context::*;
pub use error::*;
pub use extract::*;
pub use hooks::{ErrorHandler, HookResult, Hooks};
pub use parser::*;
pub use session::*;
pub use stream::{BuildStream, ContextWriter, ProgressReader};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
