//! Scripter core: hosting scripts written in several languages.
//!
//! - [`script`] -- the [`Script`] model and its validation
//! - [`scripting`] -- execution backends (`expr`, `shell`, `python`)
//! - [`sandbox`] -- per-script artifact sandboxes
//! - [`transformer`] -- source-to-source rewriting before preparation
//! - [`composer`] -- namespace composition from globals, variables, services
//! - [`prepared`] -- prepared scripts and services, and their registry codec
//! - [`scripter`] -- the [`Scripter`] orchestrator tying it all together

pub mod composer;
pub mod error;
pub mod prepared;
pub mod sandbox;
pub mod script;
pub mod scripter;
pub mod scripting;
pub mod serialization;
pub mod transformer;
pub mod value;

pub use error::CoreError;
pub use prepared::PreparedObject;
pub use script::{Script, Usage};
pub use scripter::{Execution, Scripter, ScripterOptions};
pub use scripting::{BackendRegistry, BackendSettings};
pub use value::{Namespace, Value};
