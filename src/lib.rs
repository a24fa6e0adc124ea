// SPDX-License-Identifier: PMPL-1.0-or-later

//! faultline: a chaos-engineering runtime.
//!
//! Experiments are created from a command path and flags, persisted in a
//! local SQLite store, and destroyed later from nothing but that record.
//!
//! MOVING PARTS:
//! 1. **Catalog**: targets, their actions and flag specs.
//! 2. **PreExecutors**: pick the channel (local, ssh, docker, kubernetes,
//!    sidecar) and routing for a request.
//! 3. **Executors**: run a `chaos_*` primitive, call an agent over HTTP, or
//!    apply a Kubernetes resource. One object serves create and destroy.
//! 4. **Primitives**: one binary per OS-level fault, each with a detached
//!    worker and a stop path that finds it again.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod flags;
pub mod lifecycle;
pub mod logging;
pub mod preexec;
pub mod primitive;
pub mod report;
pub mod store;
pub mod transport;
pub mod types;
pub mod util;
