//! # rtbox-core
//!
//! Cgroup primitives for the rtbox runtime.
//!
//! This crate provides:
//! - **Control files**: read/write access to cgroup control files behind a
//!   substitutable [`cgroup::fs::ControlFiles`] trait.
//! - **CPU controller**: shares, CFS bandwidth, and real-time settings with
//!   the kernel's ordering constraints honoured.
//! - **Real-time ledger**: per-core runtime reservations propagated up a
//!   fixed ancestor chain under an injected lock.
//! - **Cgroup manager**: the per-container subtree (apply, set, freeze,
//!   destroy, process enumeration).
//! - **Intel RDT** and **namespace** configuration consumed by the runtime.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod cgroup;
pub mod intelrdt;
pub mod namespace;
