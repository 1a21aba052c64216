//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide gRPC server implementations
//! for integration testing `multibase_core`. The `.proto` sources are exposed through
//! [`PROTO_DIR`] so tests can compile them at runtime, exactly like a user would.
//! It is not intended for production use.

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

/// `greeter.proto` declares no package, so prost emits it as `_.rs`.
pub mod greeter {
    include!(concat!(env!("OUT_DIR"), "/_.rs"));
}

pub use greeter::greeter_server::{Greeter, GreeterServer};
pub use pb::echo_service_server::{EchoService, EchoServiceServer};

/// Directory holding `echo.proto` and `greeter.proto`.
pub const PROTO_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/proto");
