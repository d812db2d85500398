//! Template renderer.
//!
//! Templates are `<name>.j2` files below a single search root and are
//! rendered with minijinja. The renderer also backs the template listing
//! and display commands.

use minijinja::{path_loader, Environment, UndefinedBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Template file extension.
pub const TEMPLATE_EXT: &str = "j2";

/// Template listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateEntry {
    /// Template name (file stem)
    pub name: String,
    /// Absolute or root-relative file path
    pub path: PathBuf,
    /// MD5 digest of the file content
    pub md5: String,
}

/// Renders `<name>.j2` templates from a search root.
#[derive(Debug)]
pub struct TemplateRenderer {
    root: PathBuf,
    env: Environment<'static>,
}

impl TemplateRenderer {
    /// Create a renderer rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut env = Environment::new();
        env.set_loader(path_loader(&root));
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { root, env }
    }

    /// Search root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path of template `name`
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, TEMPLATE_EXT))
    }

    /// Check if template `name` exists
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Render template `name` with `vars`
    pub fn render<S: Serialize>(&self, name: &str, vars: &S) -> Result<String> {
        if !self.exists(name) {
            return Err(Error::TemplateNotFound(name.to_string()));
        }
        let file = format!("{}.{}", name, TEMPLATE_EXT);
        let template = self
            .env
            .get_template(&file)
            .map_err(|e| Error::template_render(name, render_error_detail(&e)))?;
        let output = template
            .render(vars)
            .map_err(|e| Error::template_render(name, render_error_detail(&e)))?;
        trace!(template = %name, bytes = output.len(), "Rendered template");
        Ok(output)
    }

    /// All templates below the root, sorted by name
    pub fn list(&self) -> Result<Vec<TemplateEntry>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "Template root does not exist");
            return Ok(entries);
        }

        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXT) || !path.is_file()
            {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let md5 = file_md5(&path).unwrap_or_else(|_| "error calculating md5".to_string());
            entries.push(TemplateEntry {
                name: name.to_string(),
                path: path.clone(),
                md5,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Template source framed by BEGIN/END banners.
    ///
    /// `key` is a template name or a 1-based index into [`list`](Self::list).
    pub fn show(&self, key: &str) -> Result<String> {
        let entries = self.list()?;
        let entry = entries
            .iter()
            .find(|e| e.name == key)
            .or_else(|| {
                key.parse::<usize>()
                    .ok()
                    .filter(|i| *i > 0)
                    .and_then(|i| entries.get(i - 1))
            })
            .ok_or_else(|| Error::TemplateNotFound(key.to_string()))?;

        let content = std::fs::read_to_string(&entry.path)?;
        Ok(format!(
            "#\n{bar} BEGIN {name} {bar}\n#\n{content}\n#\n{bar} END  {name} {bar}#\n#",
            bar = "#".repeat(39),
            name = entry.name,
            content = content,
        ))
    }
}

/// MD5 hex digest of a file.
pub fn file_md5(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    Ok(format!("{:x}", md5::compute(content)))
}

fn render_error_detail(err: &minijinja::Error) -> String {
    let mut detail = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        detail.push_str(": ");
        detail.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    detail
}
