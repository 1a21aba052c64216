//! # Multibase CLI Entry Point
//!
//! The main executable for the Multibase tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs logging.
//! 2. **Compilation**: Compiles the requested `.proto` files into a single project.
//! 3. **Execution**: Describes or calls a method through the project handler.
//! 4. **Presentation**: Formats and prints the resulting data or error to standard output/error.

mod cli;
mod formatter;

use clap::Parser;
use cli::{Cli, Commands};
use formatter::{FormattedString, JsonText, Template, TreeView};
use multibase_core::handler::{HandlerError, ProjectId, Projects, RequestId};
use multibase_core::invoker::InvokeError;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// The CLI works on a single project and a single request at a time.
const PROJECT: ProjectId = 0;
const REQUEST: RequestId = 0;

#[tokio::main]
async fn main() {
    init_tracing();

    let args = Cli::parse();
    let projects = Arc::new(Projects::new());

    match args.command {
        Commands::Tree { files } => {
            let tree = refresh_or_exit(&projects, args.import_paths, files).await;
            println!("{}", FormattedString::from(TreeView(tree)));
        }
        Commands::Describe { method, files } => {
            refresh_or_exit(&projects, args.import_paths, files).await;
            describe_method(&projects, &method);
        }
        Commands::Call {
            method,
            files,
            address,
            body,
        } => {
            refresh_or_exit(&projects, args.import_paths, files).await;
            run_call(projects, &method, &address, &body).await;
        }
    }
}

/// Logs go to stderr so stdout only carries responses.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_with(err: HandlerError) -> ! {
    let code = match err {
        HandlerError::Invoke(InvokeError::Cancelled) => 130,
        _ => 1,
    };
    eprintln!("{}", FormattedString::from(err));
    process::exit(code);
}

async fn refresh_or_exit(
    projects: &Projects,
    import_paths: Vec<PathBuf>,
    files: Vec<PathBuf>,
) -> Vec<multibase_core::tree::TreeNode> {
    match projects
        .refresh_proto_descriptors(PROJECT, import_paths, files)
        .await
    {
        Ok(tree) => tree,
        Err(err) => exit_with(err),
    }
}

fn describe_method(projects: &Projects, method: &str) {
    let signature = projects
        .select_method(PROJECT, method)
        .unwrap_or_else(|err| exit_with(err));
    let template = projects
        .request_template(PROJECT, method)
        .unwrap_or_else(|err| exit_with(err));

    println!("{}", FormattedString::from(signature));
    println!("{}", FormattedString::from(Template(template)));
}

async fn run_call(projects: Arc<Projects>, method: &str, address: &str, body: &str) {
    let signature = projects
        .select_method(PROJECT, method)
        .unwrap_or_else(|err| exit_with(err));
    let streams_responses = signature.call_shape.streams_responses();

    tokio::spawn({
        let projects = Arc::clone(&projects);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if let Err(err) = projects.stop_request(PROJECT, REQUEST) {
                    // The request finished before the signal arrived.
                    tracing::debug!(%err, "nothing to stop");
                }
            }
        }
    });

    let result = projects
        .send_request(PROJECT, REQUEST, address, method, body, |msg| {
            println!("{}", FormattedString::from(JsonText(msg)));
        })
        .await;

    match result {
        // Streamed responses were already printed as they arrived.
        Ok(_) if streams_responses => {}
        Ok(last) => println!("{}", FormattedString::from(JsonText(&last))),
        Err(err) => exit_with(err),
    }
}
