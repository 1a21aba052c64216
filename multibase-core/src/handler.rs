//! # Project Handler
//!
//! The surface a front end talks to. A project is a set of `.proto` files compiled together;
//! each one gets a [`ProjectHandler`] owning:
//!
//! * a snapshot of the compiled descriptors and their tree, swapped atomically on refresh
//!   (when refreshes overlap, the one started last wins whatever order they finish in);
//! * the registry of its in-flight requests, keyed by caller-chosen [`RequestId`]s.
//!
//! [`Projects`] maps project ids to handlers, creating them on first use.
//!
//! ## Locking
//!
//! Locks are only held to read or swap state, never across compilation or network I/O.
//! A send resolves its method from a cloned snapshot, so a concurrent refresh cannot
//! change a call that already started.
mod registry;

pub use registry::{RequestGuard, RequestRegistry};

use crate::codec;
use crate::compiler::{self, CompileError, DescriptorSet};
use crate::invoker::{self, InvokeError};
use crate::tree::{self, CallShape, NodeKind, TreeNode};
use prost_reflect::MethodDescriptor;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

pub type ProjectId = i64;
pub type RequestId = i64;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Failed to compile proto files: {0}")]
    Compile(#[from] CompileError),
    #[error("Method '{0}' not found")]
    MethodNotFound(String),
    #[error("Request {0} not found")]
    RequestNotFound(RequestId),
    #[error("Request {0} is already in progress")]
    RequestInProgress(RequestId),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

/// Human-readable description of a method, shown when it is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSignature {
    pub full_name: String,
    pub name: String,
    pub call_shape: CallShape,
    pub input: String,
    pub output: String,
}

impl MethodSignature {
    pub fn new(method: &MethodDescriptor) -> Self {
        Self {
            full_name: method.full_name().to_string(),
            name: method.name().to_string(),
            call_shape: CallShape::of(method),
            input: method.input().full_name().to_string(),
            output: method.output().full_name().to_string(),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stream = |yes: bool| if yes { "stream " } else { "" };

        write!(
            f,
            "{} ({}): rpc {}({}{}) returns ({}{})",
            self.full_name,
            self.call_shape,
            self.name,
            stream(self.call_shape.streams_requests()),
            self.input,
            stream(self.call_shape.streams_responses()),
            self.output,
        )
    }
}

#[derive(Debug)]
struct Snapshot {
    /// Number of the refresh that produced this snapshot, 0 before the first one.
    generation: u64,
    descriptors: DescriptorSet,
    tree: Vec<TreeNode>,
}

/// One project: its compiled sources and its in-flight requests.
#[derive(Debug)]
pub struct ProjectHandler {
    project_id: ProjectId,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Last generation handed out to a refresh.
    generation: AtomicU64,
    requests: RequestRegistry,
}

impl ProjectHandler {
    /// A project with nothing compiled yet.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            snapshot: RwLock::new(Arc::new(Snapshot {
                generation: 0,
                descriptors: DescriptorSet::empty(),
                tree: Vec::new(),
            })),
            generation: AtomicU64::new(0),
            requests: RequestRegistry::new(),
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// The current tree, empty before the first successful refresh.
    pub fn tree(&self) -> Vec<TreeNode> {
        self.snapshot().tree.clone()
    }

    /// Whether request `request_id` is still running.
    pub fn is_request_live(&self, request_id: RequestId) -> bool {
        self.requests.is_live(request_id)
    }

    /// Recompiles the project and returns its new tree.
    ///
    /// On failure the previous descriptors and tree are kept untouched. If a refresh that
    /// started later has already been installed, this one's result is dropped and the
    /// installed tree is returned instead.
    #[instrument(skip_all, fields(project = self.project_id))]
    pub async fn refresh_proto_descriptors(
        &self,
        import_paths: Vec<PathBuf>,
        proto_files: Vec<PathBuf>,
    ) -> Result<Vec<TreeNode>, HandlerError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(files = proto_files.len(), generation, "compiling proto files");

        let descriptors = tokio::task::spawn_blocking(move || {
            compiler::compile(&import_paths, &proto_files)
        })
        .await
        .map_err(|err| CompileError::new(None, None, format!("Compiler task failed: {err}")))?
        .inspect_err(|err| warn!(%err, "compilation failed, keeping previous descriptors"))?;

        Ok(self.install(generation, descriptors))
    }

    /// Swaps in the descriptors of refresh `generation` unless a later refresh got there
    /// first. Returns the tree that is current afterwards.
    fn install(&self, generation: u64, descriptors: DescriptorSet) -> Vec<TreeNode> {
        let tree = tree::build(&descriptors);
        let mut current = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);

        if current.generation > generation {
            debug!(
                generation,
                installed = current.generation,
                "stale refresh discarded"
            );
            return current.tree.clone();
        }

        *current = Arc::new(Snapshot {
            generation,
            descriptors,
            tree: tree.clone(),
        });
        drop(current);

        info!(packages = tree.len(), generation, "proto descriptors refreshed");
        tree
    }

    /// Describes the method behind tree node `method_id`.
    pub fn select_method(&self, method_id: &str) -> Result<MethodSignature, HandlerError> {
        self.resolve(method_id).map(|method| MethodSignature::new(&method))
    }

    /// A pretty-printed JSON skeleton of the request(s) `method_id` expects.
    pub fn request_template(&self, method_id: &str) -> Result<String, HandlerError> {
        let method = self.resolve(method_id)?;
        let skeleton = codec::template(&method.input());

        let value = if CallShape::of(&method).streams_requests() {
            serde_json::Value::Array(vec![skeleton])
        } else {
            skeleton
        };

        Ok(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }

    /// Calls `method_id` on `address` and returns the final response text.
    ///
    /// Responses of streaming calls are passed to `on_message` as they arrive. The request
    /// can be stopped with [`ProjectHandler::stop_request`] while it runs; `request_id` is
    /// free again as soon as this returns.
    #[instrument(skip(self, payload, on_message), fields(project = self.project_id))]
    pub async fn send_request<F>(
        &self,
        request_id: RequestId,
        address: &str,
        method_id: &str,
        payload: &str,
        on_message: F,
    ) -> Result<String, HandlerError>
    where
        F: FnMut(&str) + Send,
    {
        let method = self.resolve(method_id)?;
        let request = self.requests.register(request_id)?;

        debug!("request started");
        let result = invoker::invoke(address, &method, payload, on_message, request.token()).await;
        drop(request);

        match &result {
            Ok(_) => debug!("request completed"),
            Err(InvokeError::Cancelled) => info!("request cancelled"),
            Err(err) => warn!(%err, "request failed"),
        }

        Ok(result?)
    }

    /// Cancels the live request `request_id`.
    ///
    /// Unknown or already finished requests yield [`HandlerError::RequestNotFound`], which
    /// callers may safely ignore.
    #[instrument(skip(self), fields(project = self.project_id))]
    pub fn stop_request(&self, request_id: RequestId) -> Result<(), HandlerError> {
        if self.requests.cancel(request_id) {
            info!("stop requested");
            Ok(())
        } else {
            Err(HandlerError::RequestNotFound(request_id))
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn resolve(&self, method_id: &str) -> Result<MethodDescriptor, HandlerError> {
        let snapshot = self.snapshot();

        tree::find(&snapshot.tree, method_id)
            .filter(|node| node.kind == NodeKind::Method)
            .and_then(|_| snapshot.descriptors.method(method_id))
            .ok_or_else(|| HandlerError::MethodNotFound(method_id.to_owned()))
    }
}

/// All projects of the running process.
#[derive(Debug, Default)]
pub struct Projects {
    handlers: RwLock<HashMap<ProjectId, Arc<ProjectHandler>>>,
}

impl Projects {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler of `project_id`, created empty on first reference.
    pub fn handler(&self, project_id: ProjectId) -> Arc<ProjectHandler> {
        if let Some(handler) = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&project_id)
        {
            return Arc::clone(handler);
        }

        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let handler = handlers.entry(project_id).or_insert_with(|| {
            debug!(project = project_id, "creating project");
            Arc::new(ProjectHandler::new(project_id))
        });
        Arc::clone(handler)
    }

    pub async fn refresh_proto_descriptors(
        &self,
        project_id: ProjectId,
        import_paths: Vec<PathBuf>,
        proto_files: Vec<PathBuf>,
    ) -> Result<Vec<TreeNode>, HandlerError> {
        self.handler(project_id)
            .refresh_proto_descriptors(import_paths, proto_files)
            .await
    }

    pub fn select_method(
        &self,
        project_id: ProjectId,
        method_id: &str,
    ) -> Result<MethodSignature, HandlerError> {
        self.handler(project_id).select_method(method_id)
    }

    pub fn request_template(
        &self,
        project_id: ProjectId,
        method_id: &str,
    ) -> Result<String, HandlerError> {
        self.handler(project_id).request_template(method_id)
    }

    pub async fn send_request<F>(
        &self,
        project_id: ProjectId,
        request_id: RequestId,
        address: &str,
        method_id: &str,
        payload: &str,
        on_message: F,
    ) -> Result<String, HandlerError>
    where
        F: FnMut(&str) + Send,
    {
        self.handler(project_id)
            .send_request(request_id, address, method_id, payload, on_message)
            .await
    }

    pub fn stop_request(
        &self,
        project_id: ProjectId,
        request_id: RequestId,
    ) -> Result<(), HandlerError> {
        self.handler(project_id).stop_request(request_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures::{self, protos_dir};

    async fn refreshed(files: &[&str]) -> ProjectHandler {
        let handler = ProjectHandler::new(1);
        handler
            .refresh_proto_descriptors(
                vec![protos_dir()],
                files.iter().map(PathBuf::from).collect(),
            )
            .await
            .unwrap();
        handler
    }

    #[tokio::test]
    async fn describes_every_call_shape() {
        let handler = refreshed(&["shop/orders.proto", "greeter.proto"]).await;

        let cases = [
            (
                "Greeter.Hello",
                "Greeter.Hello (unary): rpc Hello(HelloReq) returns (HelloResp)",
            ),
            (
                "shop.Orders.Watch",
                "shop.Orders.Watch (server streaming): rpc Watch(shop.OrderId) returns (stream shop.Order)",
            ),
            (
                "shop.Orders.Upload",
                "shop.Orders.Upload (client streaming): rpc Upload(stream shop.Order) returns (shop.Summary)",
            ),
            (
                "shop.Orders.Sync",
                "shop.Orders.Sync (bidirectional streaming): rpc Sync(stream shop.Order) returns (stream shop.Order)",
            ),
        ];

        for (id, expected) in cases {
            assert_eq!(handler.select_method(id).unwrap().to_string(), expected);
        }
    }

    #[tokio::test]
    async fn only_method_nodes_can_be_selected() {
        let handler = refreshed(&["shop/orders.proto"]).await;

        for id in ["shop", "shop.Orders", "shop.Orders.Nope", ""] {
            let err = handler.select_method(id).unwrap_err();
            assert!(matches!(err, HandlerError::MethodNotFound(ref m) if m == id), "{id}");
        }
    }

    #[tokio::test]
    async fn templates_follow_the_request_framing() {
        let handler = refreshed(&["shop/orders.proto"]).await;

        let single: serde_json::Value =
            serde_json::from_str(&handler.request_template("shop.Orders.Get").unwrap()).unwrap();
        assert_eq!(single, serde_json::json!({ "id": "" }));

        let streamed: serde_json::Value =
            serde_json::from_str(&handler.request_template("shop.Orders.Upload").unwrap())
                .unwrap();
        let items = streamed.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].get("total").is_some());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_previous_tree() {
        let handler = refreshed(&["greeter.proto"]).await;
        let before = handler.tree();

        let err = handler
            .refresh_proto_descriptors(
                vec![protos_dir()],
                vec![PathBuf::from("broken/syntax.proto")],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Compile(_)));
        assert_eq!(handler.tree(), before);
        assert!(handler.select_method("Greeter.Hello").is_ok());
    }

    #[tokio::test]
    async fn refresh_replaces_the_tree() {
        let handler = refreshed(&["greeter.proto"]).await;

        handler
            .refresh_proto_descriptors(
                vec![protos_dir()],
                vec![PathBuf::from("shop/catalog.proto")],
            )
            .await
            .unwrap();

        assert!(handler.select_method("Greeter.Hello").is_err());
        assert!(handler.select_method("shop.Catalog.List").is_ok());
    }

    #[test]
    fn a_refresh_finishing_late_does_not_replace_a_newer_one() {
        let handler = ProjectHandler::new(1);

        // Generation 2 started last but finishes first.
        let newer = handler.install(2, fixtures::compile(&["shop/catalog.proto"]));
        let stale = handler.install(1, fixtures::compile(&["greeter.proto"]));

        assert_eq!(stale, newer);
        assert_eq!(handler.tree(), newer);
        assert!(handler.select_method("shop.Catalog.List").is_ok());
        assert!(handler.select_method("Greeter.Hello").is_err());
    }

    #[tokio::test]
    async fn successive_refreshes_get_increasing_generations() {
        let handler = refreshed(&["greeter.proto"]).await;
        let first = handler.snapshot().generation;

        handler
            .refresh_proto_descriptors(
                vec![protos_dir()],
                vec![PathBuf::from("shop/catalog.proto")],
            )
            .await
            .unwrap();

        assert!(handler.snapshot().generation > first);
        assert!(handler.select_method("shop.Catalog.List").is_ok());
    }

    #[test]
    fn new_projects_are_empty() {
        let projects = Projects::new();

        assert!(projects.handler(3).tree().is_empty());
        assert!(matches!(
            projects.select_method(3, "Greeter.Hello"),
            Err(HandlerError::MethodNotFound(_))
        ));
        assert!(Arc::ptr_eq(&projects.handler(3), &projects.handler(3)));
        assert!(!Arc::ptr_eq(&projects.handler(3), &projects.handler(4)));
    }

    #[test]
    fn stopping_an_unknown_request_is_reported() {
        let projects = Projects::new();
        let err = projects.stop_request(1, 99).unwrap_err();
        assert!(matches!(err, HandlerError::RequestNotFound(99)));
    }

    #[tokio::test]
    async fn unknown_methods_are_rejected_before_registering() {
        let handler = refreshed(&["greeter.proto"]).await;

        let err = handler
            .send_request(5, "127.0.0.1:9", "Greeter.Bye", "{}", |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::MethodNotFound(_)));
        assert!(!handler.is_request_live(5));
    }
}
