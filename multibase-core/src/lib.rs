//! # Multibase Core
//!
//! `multibase-core` is the dynamic RPC engine behind the Multibase API-testing tool. It
//! compiles user supplied `.proto` files at runtime and calls any method they declare
//! without compile-time knowledge of the schema.
//!
//! ## Key Components
//!
//! * **[`compiler`]:** Parses `.proto` files and their imports into a [`compiler::DescriptorSet`].
//! * **[`tree`]:** Turns a descriptor set into a browsable tree of packages, services and methods.
//! * **[`codec`]:** Strict JSON <-> Protobuf transcoding driven by a `MessageDescriptor`,
//!   plus the `tonic` codec that carries it over the wire.
//! * **[`invoker`]:** Performs one call of any shape (unary, server/client/bidirectional streaming)
//!   with cooperative cancellation.
//! * **[`handler`]:** The per-project façade ([`handler::ProjectHandler`]) and the project
//!   registry ([`handler::Projects`]). This is the surface a front end talks to.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost-reflect`, `tokio-util` and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod codec;
pub mod compiler;
pub mod handler;
pub mod invoker;
pub mod tree;

// Re-exports
pub use prost_reflect;
pub use tokio_util;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
