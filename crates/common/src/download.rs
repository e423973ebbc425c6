//! Remote file download

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{Error, Result};

/// Fetches a remote file to a local path
pub trait Downloader: Send + Sync {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Blocking HTTP(S) downloader
///
/// The body is streamed into a temporary file next to `dest` and renamed
/// into place once complete, so an interrupted download never looks cached.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(600))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wpharness/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let fail = |reason: String| Error::Download {
            url: url.to_string(),
            reason,
        };

        info!("Downloading {} to {}", url, dest.display());

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fail(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fail(format!("HTTP {}", response.status())));
        }

        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;
        let bytes = io::copy(&mut response, tmp.as_file_mut()).map_err(|e| fail(e.to_string()))?;
        tmp.persist(dest).map_err(|e| fail(e.error.to_string()))?;

        info!("Downloaded {} bytes from {}", bytes, url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_unreachable_host_is_download_error() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("mysql.tar.xz");
        let downloader = HttpDownloader::with_timeout(Duration::from_secs(2)).unwrap();

        // Port 9 (discard) on localhost refuses connections.
        let err = downloader
            .download("http://127.0.0.1:9/mysql.tar.xz", &dest)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Download);
        assert!(err.to_string().contains("127.0.0.1:9"));
        assert!(!dest.exists());
    }
}
