use colored::*;
use multibase_core::handler::{HandlerError, MethodSignature};
use multibase_core::invoker::InvokeError;
use multibase_core::tree::{NodeKind, TreeNode};

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

/// The tree returned by a refresh.
pub struct TreeView(pub Vec<TreeNode>);

/// One JSON message as received from the server.
pub struct JsonText<'a>(pub &'a str);

/// Pretty JSON of a request template.
pub struct Template(pub String);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<JsonText<'_>> for FormattedString {
    fn from(JsonText(text): JsonText<'_>) -> Self {
        let pretty = serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or_else(|| text.to_string());
        FormattedString(pretty)
    }
}

impl From<MethodSignature> for FormattedString {
    fn from(signature: MethodSignature) -> Self {
        FormattedString(format!(
            "{} {}\n\n{}",
            "Method:".bold(),
            signature.full_name.cyan(),
            signature.to_string().dimmed()
        ))
    }
}

impl From<Template> for FormattedString {
    fn from(Template(json): Template) -> Self {
        FormattedString(format!("{}\n{}", "Request template:".bold(), json))
    }
}

impl From<HandlerError> for FormattedString {
    fn from(err: HandlerError) -> Self {
        let title = match &err {
            HandlerError::Compile(_) => "Compilation Failed:",
            HandlerError::MethodNotFound(_) => "Symbol Lookup Failed:",
            HandlerError::RequestNotFound(_) | HandlerError::RequestInProgress(_) => {
                "Request Error:"
            }
            HandlerError::Invoke(InvokeError::Remote { code, message }) => {
                return FormattedString(format!(
                    "{} code={:?} message={:?}",
                    "gRPC Failed:".red().bold(),
                    code,
                    message
                ));
            }
            HandlerError::Invoke(InvokeError::Cancelled) => {
                return FormattedString("Request cancelled.".yellow().to_string());
            }
            HandlerError::Invoke(InvokeError::Codec(_)) => "Invalid Request Body:",
            HandlerError::Invoke(InvokeError::Transport { .. }) => "Connection Error:",
        };

        FormattedString(format!("{}\n\n'{}'", title.red().bold(), err))
    }
}

impl From<TreeView> for FormattedString {
    fn from(TreeView(packages): TreeView) -> Self {
        if packages.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        for package in &packages {
            write_node(&mut out, package, 0);
        }
        FormattedString(out.trim_end().to_string())
    }
}

fn write_node(out: &mut String, node: &TreeNode, depth: usize) {
    let indent = "  ".repeat(depth);

    let line = match node.kind {
        NodeKind::Package => node.label.bold().to_string(),
        NodeKind::Service => format!("- {}", node.label.green()),
        NodeKind::Method => match node.call_shape {
            Some(shape) => format!(
                "- {} {} {}",
                node.label.cyan(),
                format!("({shape})").dimmed(),
                node.id.dimmed()
            ),
            None => format!("- {}", node.label.cyan()),
        },
    };

    out.push_str(&format!("{indent}{line}\n"));
    for child in &node.children {
        write_node(out, child, depth + 1);
    }
}
