//! SQL template store
//!
//! Templates are plain `.sql` files under a root directory, addressed by
//! folder and name. `{{ name }}` placeholders are replaced by parameter values
//! as text; template authors are trusted, nothing here escapes SQL.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("SQL template {} could not be read: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQL template '{template}' references unknown parameter '{parameter}'")]
    UnknownParameter { template: String, parameter: String },
}

/// Folder a template lives in, relative to the template root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFolder {
    Core,
    Dwh,
}

impl TemplateFolder {
    fn dir(self) -> Option<&'static str> {
        match self {
            TemplateFolder::Core => None,
            TemplateFolder::Dwh => Some("dwh"),
        }
    }
}

/// (folder, name) address of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub folder: TemplateFolder,
    pub name: String,
}

impl TemplateRef {
    pub fn core(name: impl Into<String>) -> Self {
        Self {
            folder: TemplateFolder::Core,
            name: name.into(),
        }
    }

    pub fn dwh(name: impl Into<String>) -> Self {
        Self {
            folder: TemplateFolder::Dwh,
            name: name.into(),
        }
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.folder.dir() {
            Some(dir) => write!(f, "{}/{}", dir, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Templates rooted at one directory
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    root: PathBuf,
}

impl SqlTemplates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, template: &TemplateRef) -> PathBuf {
        let mut path = self.root.clone();
        if let Some(dir) = template.folder.dir() {
            path.push(dir);
        }
        path.push(format!("{}.sql", template.name));
        path
    }

    pub async fn load(&self, template: &TemplateRef) -> Result<String, TemplateError> {
        let path = self.path(template);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| TemplateError::Read { path, source })
    }

    /// Load and render a template. Without a context the text is returned as is.
    pub async fn render(
        &self,
        template: &TemplateRef,
        context: Option<&BTreeMap<&'static str, String>>,
    ) -> Result<String, TemplateError> {
        let content = self.load(template).await?;
        match context {
            Some(context) => render_str(&template.to_string(), &content, context),
            None => Ok(content),
        }
    }
}

/// Substitute every `{{ name }}` placeholder in `content`
pub fn render_str(
    template: &str,
    content: &str,
    context: &BTreeMap<&'static str, String>,
) -> Result<String, TemplateError> {
    if let Some(unknown) = PLACEHOLDER_RE
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .find(|name| !context.contains_key(name.as_str()))
    {
        return Err(TemplateError::UnknownParameter {
            template: template.to_string(),
            parameter: unknown,
        });
    }

    Ok(PLACEHOLDER_RE
        .replace_all(content, |caps: &regex::Captures<'_>| {
            context.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}
