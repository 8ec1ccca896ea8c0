//! # rtbox-runtime
//!
//! Container lifecycle for the rtbox runtime: the state machine, the
//! terminal destroy protocol, init-process handles, poststop hooks, and the
//! persisted state that lets a later invocation pick a container back up.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod container;
mod destroy;
pub mod hooks;
pub mod oci;
pub mod process;
pub mod state;

pub use container::{Container, ContainerConfig};
pub use state::ContainerState;
