//! Path admission control for indexing.

use std::path::Path;

use crate::error::{IndexError, Result};

/// Decides whether a file is worth indexing.
///
/// Consulted once per file before tokenization; a `false` silently skips the
/// file — it is neither an error nor tracked as watched.
pub trait PathFilter: Send + Sync {
    /// Returns true if the given path is allowed, otherwise false.
    fn is_allowed_path(&self, path: &Path) -> bool;

    /// Human-readable description of the strategy.
    fn meta(&self) -> String;
}

/// Allow-list filter based on file extension, with glob exclude patterns.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    allowed_extensions: Vec<String>,
    exclude_patterns: Vec<glob::Pattern>,
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        let mut filter = Self::new(["txt", "md", "rs"]);
        for pattern in Self::default_excludes() {
            // Statically known patterns; compilation cannot fail.
            if let Ok(compiled) = glob::Pattern::new(pattern) {
                filter.exclude_patterns.push(compiled);
            }
        }
        filter
    }
}

impl ExtensionFilter {
    /// Filter allowing only the given extensions, with no excludes.
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed_extensions: allowed.into_iter().map(Into::into).collect(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Add a glob exclude pattern.
    pub fn exclude(mut self, pattern: &str) -> Result<Self> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| IndexError::InvalidPattern(format!("{pattern}: {e}")))?;
        self.exclude_patterns.push(compiled);
        Ok(self)
    }

    /// Default exclude patterns for directories nobody wants indexed.
    fn default_excludes() -> &'static [&'static str] {
        &[
            "**/.git/**",
            "**/node_modules/**",
            "**/target/**",
            "**/build/**",
            "**/*.tmp",
            "**/*~",
        ]
    }
}

impl PathFilter for ExtensionFilter {
    fn is_allowed_path(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(&path_str))
        {
            return false;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.allowed_extensions.iter().any(|a| a == ext))
    }

    fn meta(&self) -> String {
        format!(
            "extension filter: allowed [{}], {} exclude patterns",
            self.allowed_extensions.join(", "),
            self.exclude_patterns.len()
        )
    }
}
