//! Execution backends.
//!
//! - [`backend`] -- the [`ExecutionBackend`] / [`Executable`] contract and
//!   [`BackendError`]
//! - [`registry`] -- language name to backend lookup, populated at startup
//! - [`expr`] -- in-process expression language
//! - [`shell`] / [`python`] -- subprocess runtimes
//! - [`subprocess`] -- spawn, pipe, and timeout plumbing shared by both

pub mod backend;
pub mod expr;
pub mod python;
pub mod registry;
pub mod shell;
pub mod subprocess;

pub use backend::{bind, BackendError, Executable, ExecutionBackend};
pub use registry::{BackendRegistry, BackendSettings};
