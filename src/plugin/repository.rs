//! Plugin repository client.
//!
//! A repository is an HTTP service whose `/list` endpoint returns a JSON
//! index of installable plugins with their per-platform binaries:
//!
//! ```json
//! {"plugins": [{"name": "echo", "version": "1.0.0",
//!   "binaries": [{"platform": "osx", "url": "https://...", "checksum": "<sha1>"}]}]}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::checksum::is_sha1_hex;
use super::{Platform, PluginResult};
use crate::core::{normalize_repo_url, HttpConfig, RepositoryRef};

/// Fields a repository record may carry.
const KNOWN_RECORD_FIELDS: &[&str] = &[
    "name",
    "description",
    "version",
    "date",
    "company",
    "author",
    "contact",
    "homepage",
    "binaries",
];

/// A plugin entry in a repository listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Plugin name
    pub name: String,

    /// Plugin description
    #[serde(default)]
    pub description: Option<String>,

    /// Plugin version (semver)
    #[serde(default)]
    pub version: Option<String>,

    /// Release date
    #[serde(default)]
    pub date: Option<String>,

    /// Publishing company
    #[serde(default)]
    pub company: Option<String>,

    /// Plugin author
    #[serde(default)]
    pub author: Option<String>,

    /// Contact address
    #[serde(default)]
    pub contact: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,

    /// Per-platform builds
    #[serde(default, deserialize_with = "null_as_empty")]
    pub binaries: Vec<Binary>,
}

/// One platform-specific build of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    /// Target platform
    pub platform: Platform,

    /// Download URL
    pub url: String,

    /// SHA-1 of the binary (40 lowercase hex digits)
    pub checksum: String,
}

impl PluginRecord {
    /// The binary published for `platform`, if any.
    pub fn binary_for(&self, platform: Platform) -> Option<&Binary> {
        self.binaries.iter().find(|b| b.platform == platform)
    }

    /// Version, or a placeholder when the repository omits it.
    pub fn version_or_unknown(&self) -> &str {
        self.version.as_deref().unwrap_or("N/A")
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Binary>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Binary>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Aggregated result of querying several repositories.
#[derive(Debug, Default)]
pub struct RepositoryListing {
    /// Plugins per repository name (only repositories that answered)
    pub plugins: HashMap<String, Vec<PluginRecord>>,

    /// One message per failed repository
    pub errors: Vec<String>,

    /// Non-fatal oddities in the listings
    pub warnings: Vec<String>,
}

impl RepositoryListing {
    /// Plugins listed by `repo_name` (case-insensitive).
    pub fn get(&self, repo_name: &str) -> Option<&[PluginRecord]> {
        self.plugins
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(repo_name))
            .map(|(_, plugins)| plugins.as_slice())
    }

    /// Whether every repository answered.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of querying one repository.
enum RepoOutcome {
    Listed { plugins: Vec<PluginRecord>, warnings: Vec<String> },
    Failed(String),
}

/// Client for plugin repository services.
pub struct RepositoryClient {
    /// HTTP client
    client: reqwest::blocking::Client,
}

impl RepositoryClient {
    /// Create a new repository client.
    pub fn new(http: &HttpConfig) -> PluginResult<Self> {
        Ok(Self { client: http.client()? })
    }

    /// Query every repository, collecting results and per-repository errors.
    ///
    /// Repositories are queried concurrently; a failing repository never
    /// affects the others.
    pub fn get_plugins(&self, repos: &[RepositoryRef]) -> RepositoryListing {
        let outcomes: Vec<(String, RepoOutcome)> = std::thread::scope(|scope| {
            let handles: Vec<_> = repos
                .iter()
                .map(|repo| {
                    let handle = scope.spawn(move || self.query(repo));
                    (repo.name.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        RepoOutcome::Failed(format!("Error requesting from repo {name}: panicked"))
                    });
                    (name, outcome)
                })
                .collect()
        });

        let mut listing = RepositoryListing::default();
        for (name, outcome) in outcomes {
            match outcome {
                RepoOutcome::Listed { plugins, warnings } => {
                    listing.plugins.insert(name, plugins);
                    listing.warnings.extend(warnings);
                }
                RepoOutcome::Failed(message) => {
                    tracing::warn!(repo = %name, "{}", message);
                    listing.errors.push(message);
                }
            }
        }

        listing
    }

    fn query(&self, repo: &RepositoryRef) -> RepoOutcome {
        let url = list_url(&repo.url);
        tracing::debug!(repo = %repo.name, url, "Querying plugin repository");

        let response = match self.client.get(&url).send() {
            Ok(response) => response,
            Err(e) => {
                return RepoOutcome::Failed(format!(
                    "Error requesting from repo {}: {}",
                    repo.name, e
                ))
            }
        };

        if !response.status().is_success() {
            return RepoOutcome::Failed(format!(
                "Error requesting from repo {}: HTTP {}",
                repo.name,
                response.status()
            ));
        }

        let body = match response.text() {
            Ok(body) => body,
            Err(e) => {
                return RepoOutcome::Failed(format!(
                    "Error reading response from repo {}: {}",
                    repo.name, e
                ))
            }
        };

        match parse_listing(&repo.name, &body) {
            Ok((plugins, warnings)) => RepoOutcome::Listed { plugins, warnings },
            Err(message) => RepoOutcome::Failed(message),
        }
    }
}

/// Listing endpoint for a repository base URL.
pub fn list_url(base: &str) -> String {
    format!("{}/list", normalize_repo_url(base))
}

/// Decode a `/list` body into plugin records plus warnings.
///
/// Records that do not decode (bad platform, malformed checksum) are
/// skipped with a warning; a missing or null `plugins` key is an error.
pub fn parse_listing(
    repo_name: &str,
    body: &str,
) -> Result<(Vec<PluginRecord>, Vec<String>), String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| format!("Invalid json data from repo {repo_name}: {e}"))?;

    let entries = match value.get("plugins") {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => {
            return Err(format!(
                "Invalid data from repo {repo_name}: 'plugins' object not found in the response"
            ))
        }
        Some(_) => {
            return Err(format!("Invalid data from repo {repo_name}: 'plugins' is not a list"))
        }
    };

    let mut plugins = Vec::with_capacity(entries.len());
    let mut warnings = Vec::new();

    for entry in entries {
        let record_name = entry.get("name").and_then(Value::as_str).unwrap_or("<unnamed>");

        if let Some(object) = entry.as_object() {
            for field in object.keys() {
                if !KNOWN_RECORD_FIELDS.contains(&field.as_str()) {
                    warnings.push(format!(
                        "{repo_name}: plugin '{record_name}' has unknown field '{field}'"
                    ));
                }
            }
        }

        match serde_json::from_value::<PluginRecord>(entry.clone()) {
            Ok(record) => {
                if let Some(bad) = record.binaries.iter().find(|b| !is_sha1_hex(&b.checksum)) {
                    warnings.push(format!(
                        "{repo_name}: plugin '{}' skipped, invalid checksum for {}",
                        record.name, bad.platform
                    ));
                    continue;
                }
                plugins.push(record);
            }
            Err(e) => {
                warnings.push(format!("{repo_name}: plugin '{record_name}' skipped: {e}"));
            }
        }
    }

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    Ok((plugins, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    #[test]
    fn test_list_url_normalizes_trailing_slash() {
        assert_eq!(list_url("https://repo.example"), "https://repo.example/list");
        assert_eq!(list_url("https://repo.example/"), "https://repo.example/list");
        assert_eq!(list_url("https://repo.example/sub/"), "https://repo.example/sub/list");
    }

    #[test]
    fn test_parse_listing() {
        let body = format!(
            r#"{{"plugins":[{{"name":"echo","description":"Echo","version":"1.0.0",
            "company":null,"author":"Someone",
            "binaries":[{{"platform":"osx","url":"https://x/echo","checksum":"{SHA}"}},
                        {{"platform":"linux64","url":"https://x/echo-linux","checksum":"{SHA}"}}]}}]}}"#
        );

        let (plugins, warnings) = parse_listing("test", &body).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(plugins.len(), 1);

        let echo = &plugins[0];
        assert_eq!(echo.name, "echo");
        assert_eq!(echo.company, None);
        assert_eq!(echo.author.as_deref(), Some("Someone"));
        assert_eq!(echo.binary_for(Platform::Linux64).unwrap().url, "https://x/echo-linux");
        assert!(echo.binary_for(Platform::Win32).is_none());
    }

    #[test]
    fn test_parse_listing_empty_is_success() {
        let (plugins, warnings) = parse_listing("test", r#"{"plugins":[]}"#).unwrap();
        assert!(plugins.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_parse_listing_errors() {
        let err = parse_listing("bad", "not json").unwrap_err();
        assert!(err.contains("Invalid json data from repo bad"));

        let err = parse_listing("bad", r#"{"items":[]}"#).unwrap_err();
        assert!(err.contains("'plugins' object not found"));

        let err = parse_listing("bad", r#"{"plugins":null}"#).unwrap_err();
        assert!(err.contains("'plugins' object not found"));

        assert!(parse_listing("bad", r#"{"plugins":{}}"#).is_err());
    }

    #[test]
    fn test_unknown_fields_are_warnings() {
        let body = r#"{"plugins":[{"name":"echo","stars":5,"binaries":null}]}"#;

        let (plugins, warnings) = parse_listing("repo", body).unwrap();
        assert_eq!(plugins.len(), 1);
        assert!(plugins[0].binaries.is_empty());
        assert_eq!(warnings, vec!["repo: plugin 'echo' has unknown field 'stars'".to_string()]);
    }

    #[test]
    fn test_only_record_fields_are_known() {
        let body = r#"{"plugins":[{"name":"echo","author":"a","authors":["a"],"created":"x","updated":"y"}]}"#;

        let (plugins, warnings) = parse_listing("repo", body).unwrap();
        assert_eq!(plugins[0].author.as_deref(), Some("a"));
        assert_eq!(warnings.len(), 3);
        for field in ["authors", "created", "updated"] {
            assert!(warnings.iter().any(|w| w.ends_with(&format!("unknown field '{field}'"))));
        }
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let body = format!(
            r#"{{"plugins":[
                {{"name":"bad-platform","binaries":[{{"platform":"amiga","url":"u","checksum":"{SHA}"}}]}},
                {{"name":"bad-sum","binaries":[{{"platform":"osx","url":"u","checksum":"ABC"}}]}},
                {{"name":"good","binaries":[]}}]}}"#
        );

        let (plugins, warnings) = parse_listing("repo", &body).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "good");
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_listing_lookup_is_case_insensitive() {
        let mut listing = RepositoryListing::default();
        listing.plugins.insert("Corp".to_string(), vec![]);

        assert!(listing.get("corp").is_some());
        assert!(listing.get("other").is_none());
        assert!(listing.is_complete());
    }
}
