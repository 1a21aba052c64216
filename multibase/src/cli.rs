//! # CLI
//!
//! This module defines the command-line interface of `multibase` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring the body is valid JSON).
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "multibase", version, about = "Call gRPC methods straight from .proto files")]
pub struct Cli {
    /// Directory to search for imports, in priority order. May be repeated.
    #[arg(short = 'I', long = "import-path", global = true)]
    pub import_paths: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the packages, services and methods declared by the given files
    Tree {
        /// The .proto files to compile
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show a method's signature and a request template to start from
    Describe {
        /// Fully qualified method name (e.g. my.package.Service.Method)
        method: String,
        /// The .proto files to compile
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Perform a gRPC call to a server
    ///
    /// Compiles the given files, then calls the method with a JSON body.
    /// Press Ctrl-C to stop a streaming call.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// multibase call -I protos my.pkg.Service.Method service.proto --address localhost:50051 --body '{"key": "value"}'
    /// ```
    Call {
        /// Fully qualified method name (e.g. my.package.Service.Method)
        method: String,
        /// The .proto files to compile
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// The server address (e.g. localhost:50051 or http://localhost:50051)
        #[arg(long)]
        address: String,
        /// JSON body (Object, or Array of Objects for client and bidirectional streaming)
        #[arg(long, value_parser = parse_body)]
        body: String,
    },
}

fn parse_body(value: &str) -> Result<String, String> {
    serde_json::from_str::<serde_json::Value>(value)
        .map(|_| value.to_string())
        .map_err(|e| format!("Invalid JSON: {e}"))
}
