//! # Descriptor Tree
//!
//! Builds the display tree (packages → services → methods) shown to the user after a
//! successful compile.
//!
//! Node ids are fully-qualified dotted names, so they stay stable across refreshes as long
//! as the symbol keeps its name. Only the explicitly requested files contribute nodes;
//! imported files supply types but no entries.
use crate::compiler::DescriptorSet;
use prost_reflect::MethodDescriptor;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Label used for the package node grouping files that declare no `package`.
pub const DEFAULT_PACKAGE_LABEL: &str = "(default)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Package,
    Service,
    Method,
}

/// Request/response multiplicity of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallShape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl CallShape {
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => CallShape::Unary,
            (false, true) => CallShape::ServerStreaming,
            (true, false) => CallShape::ClientStreaming,
            (true, true) => CallShape::BidiStreaming,
        }
    }

    /// Whether the request side is a sequence of messages.
    pub fn streams_requests(self) -> bool {
        matches!(self, CallShape::ClientStreaming | CallShape::BidiStreaming)
    }

    /// Whether the response side is a sequence of messages.
    pub fn streams_responses(self) -> bool {
        matches!(self, CallShape::ServerStreaming | CallShape::BidiStreaming)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallShape::Unary => "unary",
            CallShape::ServerStreaming => "server streaming",
            CallShape::ClientStreaming => "client streaming",
            CallShape::BidiStreaming => "bidirectional streaming",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    /// Only set on method nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_shape: Option<CallShape>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            call_shape: None,
            children: Vec::new(),
        }
    }
}

/// Builds the tree for `descriptors`.
///
/// Packages are merged across files and ordered by first appearance; services and methods
/// keep their declaration order, then file order.
pub fn build(descriptors: &DescriptorSet) -> Vec<TreeNode> {
    let mut packages: Vec<TreeNode> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for file in descriptors.files() {
        let package = file.package_name().to_string();

        let position = *index.entry(package.clone()).or_insert_with(|| {
            let label = if package.is_empty() {
                DEFAULT_PACKAGE_LABEL.to_string()
            } else {
                package.clone()
            };
            packages.push(TreeNode::new(package.clone(), label, NodeKind::Package));
            packages.len() - 1
        });

        for service in file.services() {
            let mut service_node =
                TreeNode::new(service.full_name(), service.name(), NodeKind::Service);

            service_node.children = service
                .methods()
                .map(|method| {
                    let mut node =
                        TreeNode::new(method.full_name(), method.name(), NodeKind::Method);
                    node.call_shape = Some(CallShape::of(&method));
                    node
                })
                .collect();

            packages[position].children.push(service_node);
        }
    }

    packages
}

/// Depth-first lookup of a node by id.
pub fn find<'a>(nodes: &'a [TreeNode], id: &str) -> Option<&'a TreeNode> {
    nodes.iter().find_map(|node| {
        if node.id == id {
            Some(node)
        } else {
            find(&node.children, id)
        }
    })
}
