//! The conversion capability the worker drives.

use crate::config::ConverterSpec;
use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Most of a failing tool's stderr is noise; keep the end.
const STDERR_TAIL: usize = 2000;

/// Markdown plus the auxiliary files produced alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedDocument {
    pub markdown: String,
    /// Asset files in placeholder order.
    pub assets: Vec<PathBuf>,
}

/// Turns one payload into Markdown.
///
/// `initialize` runs once per batch before any item; an error there fails
/// the whole batch. `convert` failures are confined to their item.
pub trait DocumentConverter {
    fn initialize(&mut self) -> Result<(), ConvertError> {
        Ok(())
    }

    fn convert(
        &mut self,
        id: &str,
        input: &Path,
        assets_dir: &Path,
    ) -> Result<RenderedDocument, ConvertError>;
}

/// Runs an external program per item and reads Markdown from its stdout.
#[derive(Debug, Clone)]
pub struct ExternalToolConverter {
    spec: ConverterSpec,
    resolved: Option<PathBuf>,
}

impl ExternalToolConverter {
    pub fn new(spec: ConverterSpec) -> Self {
        Self {
            spec,
            resolved: None,
        }
    }

    fn render_args(&self, id: &str, input: &Path, assets_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let assets = assets_dir.to_string_lossy();
        self.spec
            .args
            .iter()
            .map(|a| {
                a.replace("{input}", &input)
                    .replace("{assets}", &assets)
                    .replace("{id}", id)
            })
            .collect()
    }
}

impl DocumentConverter for ExternalToolConverter {
    fn initialize(&mut self) -> Result<(), ConvertError> {
        let path = which::which(&self.spec.program).map_err(|_| ConvertError::ToolNotFound {
            program: self.spec.program.clone(),
        })?;
        info!("Using conversion tool {}", path.display());
        self.resolved = Some(path);
        Ok(())
    }

    fn convert(
        &mut self,
        id: &str,
        input: &Path,
        assets_dir: &Path,
    ) -> Result<RenderedDocument, ConvertError> {
        let program = self
            .resolved
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.spec.program));
        let args = self.render_args(id, input, assets_dir);
        debug!("Running {} {:?}", program.display(), args);

        let output = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ConvertError::Launch {
                program: self.spec.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let tail_start = stderr
                .char_indices()
                .rev()
                .nth(STDERR_TAIL)
                .map(|(i, _)| i)
                .unwrap_or(0);
            return Err(ConvertError::ToolFailed {
                program: self.spec.program.clone(),
                status: output.status.to_string(),
                stderr: stderr[tail_start..].to_string(),
            });
        }

        let assets = super::assets::collect_assets(assets_dir).map_err(|e| ConvertError::Asset {
            path: assets_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(RenderedDocument {
            markdown: String::from_utf8_lossy(&output.stdout).into_owned(),
            assets,
        })
    }
}
