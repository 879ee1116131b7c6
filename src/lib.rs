//! foundry: deterministic control-plane supervisor for external AI
//! coding agents.
//!
//! A single sequential control loop dequeues operator-defined tasks FIFO
//! from Redis, builds prompts from a minimal state snapshot, dispatches
//! each task to a provider CLI under circuit-breaker fallback, validates
//! the output against explicit acceptance criteria, and persists every
//! state transition as one full-overwrite JSON blob.

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{SupervisorError, SupervisorResult};
