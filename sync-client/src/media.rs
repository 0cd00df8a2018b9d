//! Access to cached image files for upload.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;

use chatsync_types::ImageSpec;

/// Provides the bytes of an image attachment.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Read the cached copy of `image`.
    async fn read(&self, image: &ImageSpec) -> io::Result<Vec<u8>>;
}

/// Images cached as plain files under one directory, keyed by file name.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Serve files from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the cached copy of `image` lives.
    pub fn path_of(&self, image: &ImageSpec) -> PathBuf {
        self.dir.join(&image.filename)
    }
}

#[async_trait]
impl MediaSource for FileCache {
    async fn read(&self, image: &ImageSpec) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path_of(image)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(filename: &str) -> ImageSpec {
        ImageSpec {
            filename: filename.into(),
            uri: format!("cache/{filename}"),
            width: 2,
            height: 2,
        }
    }

    #[tokio::test]
    async fn reads_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"png-bytes").unwrap();

        let cache = FileCache::new(dir.path());
        let bytes = cache.read(&image("cat.png")).await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let err = cache.read(&image("gone.png")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
