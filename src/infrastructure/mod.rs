//! Infrastructure layer: config, logging, Redis persistence, provider
//! CLIs, and structural inspectors.

pub mod ast;
pub mod config;
pub mod logging;
pub mod providers;
pub mod redis;
