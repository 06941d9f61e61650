//! Persisting figures the conversion tool extracted.
//!
//! The tool leaves image files in the item's assets directory and marks
//! their positions in the Markdown with `<!-- image -->`. Each persisted
//! asset's locator replaces the next placeholder, in file-name order.

use crate::config::AssetSpec;
use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const IMAGE_PLACEHOLDER: &str = "<!-- image -->";

/// Blob storage for auxiliary assets; returns a public locator per asset.
pub trait AssetStore {
    fn persist(&mut self, id: &str, index: usize, source: &Path) -> Result<String, ConvertError>;
}

/// Copies assets into a local directory, optionally fronted by a public URL.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    dir: PathBuf,
    public_base_url: Option<String>,
}

impl LocalAssetStore {
    pub fn new(spec: &AssetSpec) -> Self {
        Self {
            dir: spec.dir.clone(),
            public_base_url: spec
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

impl AssetStore for LocalAssetStore {
    fn persist(&mut self, id: &str, index: usize, source: &Path) -> Result<String, ConvertError> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_ascii_lowercase();
        let name = format!("{}-figure-{}.{}", id.replace('/', "_"), index, ext);
        let target = self.dir.join(&name);

        let asset_err = |e: std::io::Error| ConvertError::Asset {
            path: target.clone(),
            reason: e.to_string(),
        };
        std::fs::create_dir_all(&self.dir).map_err(asset_err)?;
        std::fs::copy(source, &target).map_err(asset_err)?;
        debug!("Stored asset {}", target.display());

        Ok(match &self.public_base_url {
            Some(base) => format!("{base}/{name}"),
            None => target.to_string_lossy().into_owned(),
        })
    }
}

/// Files in `dir`, sorted by name. A missing directory has no assets.
pub fn collect_assets(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Replace placeholders left to right with `![image](locator)`.
/// Surplus placeholders are left as they are.
pub fn substitute_placeholders(markdown: &str, locators: &[String]) -> String {
    let mut out = markdown.to_string();
    for locator in locators {
        out = out.replacen(IMAGE_PLACEHOLDER, &format!("![image]({locator})"), 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_replaced_in_order() {
        let md = "a <!-- image --> b <!-- image --> c <!-- image -->";
        let out = substitute_placeholders(md, &["u1".into(), "u2".into()]);
        assert_eq!(out, "a ![image](u1) b ![image](u2) c <!-- image -->");
    }

    #[test]
    fn local_store_names_and_locates_assets() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let fig = src.path().join("page1.PNG");
        std::fs::write(&fig, b"png").unwrap();

        let mut store = LocalAssetStore::new(&AssetSpec {
            dir: out.path().join("assets"),
            public_base_url: Some("https://cdn.example/figs/".into()),
        });
        let url = store.persist("2101.00001v1", 1, &fig).unwrap();
        assert_eq!(url, "https://cdn.example/figs/2101.00001v1-figure-1.png");
        assert!(out.path().join("assets/2101.00001v1-figure-1.png").exists());

        let mut bare = LocalAssetStore::new(&AssetSpec {
            dir: out.path().join("assets"),
            public_base_url: None,
        });
        let path = bare.persist("x", 2, &fig).unwrap();
        assert!(path.ends_with("x-figure-2.png"));
    }

    #[test]
    fn collect_assets_sorts_and_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_assets(&dir.path().join("nope")).unwrap().is_empty());
        std::fs::write(dir.path().join("b.png"), b"").unwrap();
        std::fs::write(dir.path().join("a.png"), b"").unwrap();
        let files = collect_assets(dir.path()).unwrap();
        assert!(files[0].ends_with("a.png"));
        assert_eq!(files.len(), 2);
    }
}
