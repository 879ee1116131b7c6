//! Application layer: the control loop orchestrating the services.

pub mod control_loop;

pub use control_loop::{ControlLoop, LoopExit};
