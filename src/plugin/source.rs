//! Classification of plugin install arguments.

use reqwest::Url;

/// Where a plugin install argument points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    /// An `http://` or `https://` URL.
    Http,
    /// A local file path (also the fallback for anything that is not a URL).
    File,
    /// A URL with a scheme we cannot fetch.
    Unsupported,
}

const DOWNLOAD_PREFIXES: [&str; 4] = ["http://", "https://", "ftp://", "ftps://"];

/// Classify an install argument.
///
/// Only inputs that parse as a URL *and* contain `://` are treated as
/// remote, so Windows drive paths (`C:\x.exe`) and bare names stay files.
pub fn determine_path_type(input: &str) -> PathType {
    match Url::parse(input) {
        Ok(url) if input.contains("://") => match url.scheme() {
            "http" | "https" => PathType::Http,
            _ => PathType::Unsupported,
        },
        _ => PathType::File,
    }
}

/// Whether the input starts with a scheme the without-repo installer downloads.
pub fn has_download_prefix(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    DOWNLOAD_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}
