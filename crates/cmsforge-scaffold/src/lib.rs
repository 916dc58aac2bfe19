//! Starter CMS project generation
//!
//! [`TemplateScaffolder`] renders a small Node.js content API (Express + Postgres)
//! with a seed script and a CI workflow that can be dispatched manually.

mod templates;
mod write;

use std::path::{Path, PathBuf};

use cmsforge_provision_api::{ScaffoldContext, ScaffoldError, Scaffolder};

/// Writes the built-in CMS starter into a fresh directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateScaffolder;

impl TemplateScaffolder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Scaffolder for TemplateScaffolder {
    fn generate(
        &self,
        target_dir: &Path,
        context: &ScaffoldContext,
    ) -> Result<Vec<PathBuf>, ScaffoldError> {
        if target_dir.exists() {
            return Err(ScaffoldError::TargetExists(target_dir.to_path_buf()));
        }
        std::fs::create_dir_all(target_dir).map_err(|source| ScaffoldError::Io {
            path: target_dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::new();
        for (relative, content) in templates::render(context) {
            let path = target_dir.join(relative);
            write::write_file_atomic(&path, &content)?;
            written.push(path);
        }

        tracing::info!(
            dir = %target_dir.display(),
            files = written.len(),
            "Generated project files"
        );
        Ok(written)
    }
}
