use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::{Category, Target};

/// Owns the on-disk layout of one mirrored bundle:
/// `<out>/index.html`, `<out>/assets/` and `<out>/assets/fonts/`.
#[derive(Clone, Debug)]
pub struct FileManager {
    base_dir: PathBuf,
    public_prefix: String,
}

impl FileManager {
    pub fn new(target: &Target, public_prefix: &str) -> Self {
        Self {
            base_dir: target.output_dir(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.base_dir.join("assets")
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.assets_dir().join("fonts")
    }

    pub fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.html")
    }

    pub async fn create_layout(&self) -> Result<()> {
        for dir in [self.base_dir.clone(), self.assets_dir(), self.fonts_dir()] {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
        Ok(())
    }

    /// Directory a file of `category` is stored in.
    pub fn dir_for(&self, category: Category) -> PathBuf {
        match category.subdir() {
            Some(subdir) => self.assets_dir().join(subdir),
            None => self.assets_dir(),
        }
    }

    /// Path the rewritten document uses to reference a stored asset.
    pub fn public_path(&self, category: Category, filename: &str) -> String {
        match category.subdir() {
            Some(subdir) => format!("{}/assets/{}/{}", self.public_prefix, subdir, filename),
            None => format!("{}/assets/{}", self.public_prefix, filename),
        }
    }

    /// Writes an asset body verbatim, creating its directory on demand.
    pub async fn save_asset(
        &self,
        category: Category,
        filename: &str,
        content: &[u8],
    ) -> std::io::Result<PathBuf> {
        let dir = self.dir_for(category);
        fs::create_dir_all(&dir).await?;

        let file_path = dir.join(filename);
        fs::write(&file_path, content).await?;
        Ok(file_path)
    }

    pub async fn save_index(&self, html: &str) -> Result<PathBuf> {
        let path = self.index_path();
        fs::write(&path, html)
            .await
            .with_context(|| format!("Failed to write document: {:?}", path))?;
        Ok(path)
    }
}
