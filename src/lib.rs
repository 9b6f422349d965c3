//! Runtime for portable Blueprint node graphs that assemble character
//! assets from content-addressed remote resources.
//!
//! Resources are described by a [`resource::Catalog`], fetched through a
//! cache → download → decode pipeline ([`loader::ResourceLoader`]) owned by
//! an [`provider::ArtifactProvider`], and consumed by graphs running on a
//! [`engine::GraphEngine`] under an [`runtime::context::ExecutionContext`].

pub mod cache;
pub mod config;
pub mod decode;
pub mod download;
pub mod engine;
pub mod error;
pub mod loader;
pub mod nodes;
pub mod provider;
pub mod resource;
pub mod runtime;

pub use error::{CatalogError, EngineError, PinError, ResolveError};
