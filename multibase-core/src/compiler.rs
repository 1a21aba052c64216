//! # Descriptor Compiler
//!
//! Compiles `.proto` sources into an in-memory [`DescriptorSet`] at runtime, with no
//! `protoc` binary and no generated code involved.
//!
//! ## How it works
//!
//! 1. Every requested file is resolved against the import paths, first match wins.
//! 2. The files and, recursively, all of their imports are parsed and linked by `protox`.
//! 3. The result is a `prost_reflect::DescriptorPool` plus the ordered list of the files
//!    that were explicitly requested.
//!
//! Compilation is all-or-nothing: the first error aborts the whole run and is reported as a
//! [`CompileError`] carrying the offending file and line when they are known.
use miette::Diagnostic;
use prost_reflect::{DescriptorPool, FileDescriptor, MethodDescriptor};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// A failure to compile a set of `.proto` files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.file, .line, .message))]
pub struct CompileError {
    /// Name of the file the error was found in, as seen by the compiler.
    pub file: Option<String>,
    /// 1-based line of the error, when the compiler pointed at a source span.
    pub line: Option<usize>,
    pub message: String,
}

impl CompileError {
    pub fn new(file: Option<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            file,
            line,
            message: message.into(),
        }
    }
}

fn render(file: &Option<String>, line: &Option<usize>, message: &str) -> String {
    match (file, line) {
        (Some(file), Some(line)) => format!("{file}:{line}: {message}"),
        (Some(file), None) => format!("{file}: {message}"),
        _ => message.to_owned(),
    }
}

impl From<protox::Error> for CompileError {
    fn from(err: protox::Error) -> Self {
        let line = err
            .labels()
            .and_then(|mut labels| labels.next())
            .and_then(|label| {
                let source = err.source_code()?;
                let contents = source.read_span(label.inner(), 0, 0).ok()?;
                Some(contents.line() + 1)
            });

        CompileError {
            file: err.file().map(str::to_owned),
            line,
            message: err.to_string(),
        }
    }
}

/// The compiled form of one project's sources.
///
/// The pool holds every compiled file, imports included. `files` keeps the names of the
/// files that were explicitly requested, in request order.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    pool: DescriptorPool,
    files: Vec<String>,
}

impl DescriptorSet {
    /// A set with no files at all.
    pub fn empty() -> Self {
        Self {
            pool: DescriptorPool::new(),
            files: Vec::new(),
        }
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// The explicitly requested files, in request order.
    pub fn files(&self) -> impl Iterator<Item = FileDescriptor> + '_ {
        self.files
            .iter()
            .filter_map(|name| self.pool.get_file_by_name(name))
    }

    /// Looks up a method by its fully-qualified name (e.g. `my.pkg.Service.Method`).
    pub fn method(&self, full_name: &str) -> Option<MethodDescriptor> {
        let (service, method) = full_name.rsplit_once('.')?;
        self.pool
            .get_service_by_name(service)?
            .methods()
            .find(|m| m.name() == method)
    }
}

/// Compiles `proto_files` (and everything they import) using `import_paths` as the
/// ordered list of include directories.
///
/// Relative file paths are looked up inside the import paths. Absolute paths are mapped to
/// the first import path containing them; a file living under none of them gets its parent
/// directory appended as a last-resort import path. Two different files that end up with
/// the same name are rejected rather than compiled as one.
pub fn compile<I, F>(import_paths: &[I], proto_files: &[F]) -> Result<DescriptorSet, CompileError>
where
    I: AsRef<Path>,
    F: AsRef<Path>,
{
    let mut includes = import_paths
        .iter()
        .map(|path| absolute(path.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut names: Vec<String> = Vec::with_capacity(proto_files.len());
    let mut paths: Vec<PathBuf> = Vec::with_capacity(proto_files.len());

    for file in proto_files {
        let resolved = resolve(&mut includes, file.as_ref())?;
        match names.iter().position(|name| *name == resolved.name) {
            Some(seen) if paths[seen] == resolved.path => {}
            Some(seen) => {
                return Err(CompileError::new(
                    Some(file.as_ref().display().to_string()),
                    None,
                    format!(
                        "conflicts with {}, both are named '{}'",
                        paths[seen].display(),
                        resolved.name
                    ),
                ));
            }
            None => {
                names.push(resolved.name);
                paths.push(resolved.path);
            }
        }
    }

    if names.is_empty() {
        return Ok(DescriptorSet::empty());
    }

    let mut compiler = protox::Compiler::new(&includes)?;
    compiler.include_imports(true);
    compiler.open_files(&paths)?;

    let pool = compiler.descriptor_pool();

    debug!(
        requested = names.len(),
        total = pool.files().count(),
        "compiled proto files"
    );

    Ok(DescriptorSet { pool, files: names })
}

struct Resolved {
    /// Name of the file relative to its import path (`a/b.proto`).
    name: String,
    /// Location of the file on disk.
    path: PathBuf,
}

fn resolve(includes: &mut Vec<PathBuf>, file: &Path) -> Result<Resolved, CompileError> {
    if file.is_relative() {
        if let Some(include) = includes.iter().find(|dir| dir.join(file).is_file()) {
            return Ok(Resolved {
                name: proto_name(file),
                path: include.join(file),
            });
        }
    }

    let path = absolute(file)?;
    if !path.is_file() {
        return Err(CompileError::new(
            Some(file.display().to_string()),
            None,
            "file not found in any import path",
        ));
    }

    if let Some(relative) = includes
        .iter()
        .find_map(|include| path.strip_prefix(include).ok())
    {
        return Ok(Resolved {
            name: proto_name(relative),
            path: path.clone(),
        });
    }

    // The file lives outside every import path: fall back to its own directory.
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    includes.push(parent);

    Ok(Resolved { name, path })
}

fn absolute(path: &Path) -> Result<PathBuf, CompileError> {
    std::path::absolute(path).map_err(|err| {
        CompileError::new(Some(path.display().to_string()), None, err.to_string())
    })
}

/// Protobuf file names always use `/`, whatever the platform.
fn proto_name(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
