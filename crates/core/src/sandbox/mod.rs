//! Per-script sandboxes with private-first artifact resolution.
//!
//! - [`manifest`] -- what a script declares
//! - [`opener`] -- where artifacts come from
//! - [`builder`] -- materializing a manifest on disk
//! - [`resolver`] -- the resulting [`Sandbox`] lookup structure

pub mod builder;
pub mod manifest;
pub mod opener;
pub mod resolver;

pub use builder::SandboxBuilder;
pub use manifest::{ArtifactSpec, SandboxManifest};
pub use opener::{
    opener_tags, ArtifactOpener, ArtifactStream, BundleOpener, FileOpener, S3Opener,
    SchemeOpener, StringOpener, UrlOpener,
};
pub use resolver::Sandbox;
