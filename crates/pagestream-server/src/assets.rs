//! Asset and static-file collaborators.
//!
//! The core only classifies requests; the bytes come from an
//! [`AssetServer`] or [`StaticServer`]. Both have directory-backed defaults
//! here: [`BundleAssetServer`] concatenates a client's source files (run
//! through the registered preprocessors) and [`DirStaticServer`] serves
//! files from the static directory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::page::{PageRequest, Rendered, ServeError};
use crate::registry::ClientRegistry;

/// Transforms one source file before it is bundled.
pub trait Preprocessor: Send + Sync {
    fn transform(&self, source: String, file: &Path) -> Result<String, ServeError>;
}

impl<F> Preprocessor for F
where
    F: Fn(String, &Path) -> Result<String, ServeError> + Send + Sync,
{
    fn transform(&self, source: String, file: &Path) -> Result<String, ServeError> {
        self(source, file)
    }
}

fn normalize_ext(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// File extension → transform.
#[derive(Clone, Default)]
pub struct PreprocessorTable {
    by_ext: HashMap<String, Arc<dyn Preprocessor>>,
}

impl PreprocessorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transform` for every extension in `exts` (with or without
    /// the leading dot). Returns the extensions whose transform was replaced.
    pub fn register<I, S>(&mut self, exts: I, transform: Arc<dyn Preprocessor>) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut replaced = Vec::new();
        for ext in exts {
            let ext = normalize_ext(ext.as_ref());
            if self.by_ext.insert(ext.clone(), transform.clone()).is_some() {
                replaced.push(ext);
            }
        }
        replaced
    }

    pub fn get(&self, ext: &str) -> Option<&Arc<dyn Preprocessor>> {
        self.by_ext.get(&normalize_ext(ext))
    }

    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn Preprocessor>> {
        path.extension().and_then(|e| e.to_str()).and_then(|e| self.get(e))
    }

    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<_> = self.by_ext.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    pub fn len(&self) -> usize {
        self.by_ext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ext.is_empty()
    }
}

impl std::fmt::Debug for PreprocessorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreprocessorTable").field("extensions", &self.extensions()).finish()
    }
}

pub trait AssetServer: Send + Sync {
    fn serve(
        &self,
        root: &Path,
        clients: &ClientRegistry,
        preprocessors: &PreprocessorTable,
        request: &PageRequest,
    ) -> Result<Rendered, ServeError>;
}

pub trait StaticServer: Send + Sync {
    fn serve(&self, root: &Path, static_dir: &str, request: &PageRequest) -> Result<Rendered, ServeError>;
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Join a URL path under `base`, refusing anything that would escape it.
fn confined(base: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = Path::new(url_path.trim_start_matches('/'));
    if relative.components().all(|c| matches!(c, Component::Normal(_))) {
        Some(base.join(relative))
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundles
// ─────────────────────────────────────────────────────────────────────────────

/// Serves `<prefix><view>.<css|js|html>` by concatenating the client's
/// matching source files in path order.
#[derive(Debug, Clone)]
pub struct BundleAssetServer {
    prefix: String,
}

impl BundleAssetServer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn expand(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, ServeError> {
        // Only the client pattern is a glob; the root is matched literally.
        let base = glob::Pattern::escape(&root.to_string_lossy());
        let base = base.trim_end_matches(['/', '\\']);

        let mut files = Vec::new();
        for pattern in patterns {
            let full = format!("{base}/{pattern}");
            let paths = glob::glob(&full).map_err(|e| ServeError::Asset(format!("bad pattern {pattern}: {e}")))?;
            files.extend(paths.filter_map(Result::ok).filter(|p| p.is_file()));
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

impl AssetServer for BundleAssetServer {
    fn serve(
        &self,
        root: &Path,
        clients: &ClientRegistry,
        preprocessors: &PreprocessorTable,
        request: &PageRequest,
    ) -> Result<Rendered, ServeError> {
        let Some(name) = request.path().strip_prefix(self.prefix.as_str()) else {
            return Ok(Rendered::not_found());
        };
        let Some((view, ext)) = name.rsplit_once('.') else {
            return Ok(Rendered::not_found());
        };
        let Some(client) = clients.get(view) else {
            return Ok(Rendered::not_found());
        };

        let patterns = match ext {
            "css" => &client.paths().css,
            "js" => &client.paths().code,
            "html" => &client.paths().tmpl,
            _ => return Ok(Rendered::not_found()),
        };

        let mut bundle = String::new();
        for file in Self::expand(root, patterns)? {
            let source = std::fs::read_to_string(&file)
                .map_err(|e| ServeError::Asset(format!("{}: {e}", file.display())))?;
            let source = match preprocessors.for_path(&file) {
                Some(p) => p.transform(source, &file)?,
                None => source,
            };
            bundle.push_str(&source);
            if !bundle.ends_with('\n') {
                bundle.push('\n');
            }
        }

        debug!("Bundled {view}.{ext} ({} bytes)", bundle.len());
        Ok(Rendered::new(200, content_type(Path::new(name)), bundle))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static files
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DirStaticServer;

impl StaticServer for DirStaticServer {
    fn serve(&self, root: &Path, static_dir: &str, request: &PageRequest) -> Result<Rendered, ServeError> {
        let Some(file) = confined(&root.join(static_dir), request.path()) else {
            return Ok(Rendered::not_found());
        };
        match std::fs::read(&file) {
            Ok(bytes) => Ok(Rendered::new(200, content_type(&file), bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Rendered::not_found()),
            Err(e) => Err(ServeError::Static(format!("{}: {e}", file.display()))),
        }
    }
}
