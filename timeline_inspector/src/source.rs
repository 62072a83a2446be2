use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use timeline_core::{FetchError, FetchTarget};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Serves manifest and frame documents out of an export directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, target: &FetchTarget) -> PathBuf {
        match target.locator() {
            None => self.root.join(MANIFEST_FILE),
            Some(locator) => {
                let relative = locator
                    .split(['?', '#'])
                    .next()
                    .unwrap_or(locator)
                    .trim_start_matches('/');
                self.root.join(relative)
            }
        }
    }

    pub async fn fetch(&self, target: &FetchTarget) -> Result<String, FetchError> {
        let path = self.resolve(target);
        let locator = target.locator().unwrap_or(MANIFEST_FILE).to_string();
        match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8(bytes).map_err(|err| FetchError::Decode {
                locator,
                message: err.to_string(),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(FetchError::NotFound { locator }),
            Err(err) => Err(FetchError::Transport {
                locator,
                message: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_resolve_under_root() {
        let source = DirectorySource::new("/data/export");
        assert_eq!(
            source.resolve(&FetchTarget::Manifest),
            PathBuf::from("/data/export/manifest.json")
        );
        assert_eq!(
            source.resolve(&FetchTarget::Live {
                locator: "/frame_live.json?ts=12".to_string()
            }),
            PathBuf::from("/data/export/frame_live.json")
        );
        assert_eq!(
            source.resolve(&FetchTarget::Archive {
                index: 3,
                locator: "frames/20240501T100000.json".to_string(),
                generation: 1,
            }),
            PathBuf::from("/data/export/frames/20240501T100000.json")
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let source = DirectorySource::new(std::env::temp_dir().join("timeline-inspector-missing"));
        let result = source
            .fetch(&FetchTarget::Live {
                locator: "nope.json".to_string(),
            })
            .await;
        assert_eq!(
            result,
            Err(FetchError::NotFound {
                locator: "nope.json".to_string()
            })
        );
    }
}
