//! Fetching plugin binaries into a scratch directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::Url;

use super::{PluginError, PluginResult};
use crate::core::HttpConfig;

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"([^"]*)"|([^;]*))"#).unwrap()
});

/// Fallback name when neither the headers nor the URL provide one.
const FALLBACK_FILENAME: &str = "download";

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Number of bytes written to disk.
    pub bytes_written: u64,
    /// Resolved file name.
    pub filename: String,
    /// Full path of the downloaded file.
    pub path: PathBuf,
}

/// Downloads one file at a time into a scratch directory.
///
/// The most recent download is tracked so it can be cleaned up with
/// [`Downloader::remove_file`]. Not meant for concurrent use.
pub struct Downloader {
    scratch_dir: PathBuf,
    client: reqwest::blocking::Client,
    downloaded: Option<PathBuf>,
}

impl Downloader {
    /// Create a downloader writing into `scratch_dir`.
    pub fn new(scratch_dir: impl Into<PathBuf>, http: &HttpConfig) -> PluginResult<Self> {
        Ok(Self { scratch_dir: scratch_dir.into(), client: http.client()?, downloaded: None })
    }

    /// Directory downloads are written to.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Path of the tracked download, if any.
    pub fn downloaded_path(&self) -> Option<&Path> {
        self.downloaded.as_deref()
    }

    /// Download `url`, following redirects.
    ///
    /// The file name comes from `Content-Disposition` when present,
    /// otherwise from the last segment of the final URL.
    pub fn download_file(&mut self, url: &str) -> PluginResult<Download> {
        std::fs::create_dir_all(&self.scratch_dir)?;

        tracing::debug!(url, "Downloading");
        let mut response = self.client.get(url).send()?;

        if !response.status().is_success() {
            return Err(PluginError::Network(format!(
                "Download of {url} failed: HTTP {}",
                response.status()
            )));
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .or_else(|| filename_from_url(response.url()))
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

        let path = self.scratch_dir.join(&filename);
        let mut file = File::create(&path)?;

        let bytes_written = match response.copy_to(&mut file) {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = std::fs::remove_file(&path);
                return Err(e.into());
            }
        };

        tracing::debug!(url, filename, bytes_written, "Download complete");
        self.downloaded = Some(path.clone());

        Ok(Download { bytes_written, filename, path })
    }

    /// Delete the tracked download. No-op if nothing was downloaded.
    pub fn remove_file(&mut self) -> PluginResult<()> {
        if let Some(path) = self.downloaded.take() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Extract the `filename` parameter of a `Content-Disposition` header.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let caps = FILENAME_RE.captures(header)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    sanitize_filename(raw)
}

/// Last non-empty path segment of a URL.
pub fn filename_from_url(url: &Url) -> Option<String> {
    url.path_segments()?.filter(|s| !s.is_empty()).last().and_then(sanitize_filename)
}

/// Trim whitespace and drop any directory components.
fn sanitize_filename(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed).trim();

    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_disposition_filename() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"echo-plugin\"").as_deref(),
            Some("echo-plugin")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename= plugin.exe ").as_deref(),
            Some("plugin.exe")
        );
        assert_eq!(
            filename_from_content_disposition("attachment;FILENAME=a.bin;size=3").as_deref(),
            Some("a.bin")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
        assert_eq!(filename_from_content_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_content_disposition_strips_directories() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"../../etc/passwd\"")
                .as_deref(),
            Some("passwd")
        );
    }

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("https://example.com/releases/v1/echo-linux64").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("echo-linux64"));

        let url = Url::parse("https://example.com/releases/plugin/").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("plugin"));

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), None);
    }

    #[test]
    fn test_remove_file_without_download_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut downloader = Downloader::new(dir.path(), &HttpConfig::default()).unwrap();

        assert!(downloader.downloaded_path().is_none());
        downloader.remove_file().unwrap();
    }

    #[test]
    fn test_download_unreachable_host() {
        let dir = TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(dir.path(), &HttpConfig { timeout_secs: 2 }).unwrap();

        let result = downloader.download_file("http://127.0.0.1:1/plugin");
        assert!(matches!(result, Err(PluginError::Network(_))));
        assert!(downloader.downloaded_path().is_none());
    }
}
