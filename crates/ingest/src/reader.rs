use async_trait::async_trait;
use std::path::Path;
use tokio::fs;

use crate::{FetchError, SourceBatch, SourcePage, TextSource};

/// Reads articles from local `.txt`/`.md` files. The topic is a file or
/// directory path; each file becomes one page titled by its file stem.
pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<SourcePage, FetchError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match extension {
            "txt" | "md" => {
                let content = fs::read_to_string(path).await.map_err(|source| FetchError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(SourcePage {
                    title: Self::title_for(path),
                    body: Some(content),
                })
            }
            _ => Err(FetchError::Malformed(format!(
                "unsupported file format: {:?}",
                extension
            ))),
        }
    }

    pub async fn read_directory(dir: &Path) -> Result<Vec<SourcePage>, FetchError> {
        let io_err = |source| FetchError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(dir).await.map_err(io_err)?;

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension() {
                    if ext == "txt" || ext == "md" {
                        paths.push(path);
                    }
                }
            }
        }

        // read_dir order is platform dependent
        paths.sort();

        let mut pages = Vec::with_capacity(paths.len());
        for path in paths {
            pages.push(Self::read_file(&path).await?);
        }

        Ok(pages)
    }

    fn title_for(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().replace('_', " "))
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextSource for FileReader {
    async fn fetch(&self, topic: &str) -> Result<SourceBatch, FetchError> {
        let path = Path::new(topic);

        let pages = if path.is_dir() {
            Self::read_directory(path).await?
        } else {
            vec![Self::read_file(path).await?]
        };

        Ok(SourceBatch { pages })
    }
}
