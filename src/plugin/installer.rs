//! Turning an install argument into a verified plugin executable on disk.
//!
//! Two strategies exist: [`LocalInstaller`] for file paths and ad-hoc URLs,
//! and [`RepoInstaller`] for plugins published in a registered repository.
//! Both fail fast; nothing is registered by this module.

use std::path::{Path, PathBuf};

use super::checksum::Sha1Checksum;
use super::downloader::Downloader;
use super::repository::RepositoryClient;
use super::source::{determine_path_type, has_download_prefix, PathType};
use super::{Platform, PluginError, PluginResult};
use crate::core::RepositoryRef;

/// Resolves an install argument to a runnable executable path.
pub trait PluginInstaller {
    /// Resolve, fetch and verify `input`, returning the executable path.
    fn install(&mut self, input: &str) -> PluginResult<PathBuf>;
}

/// State shared by the installers, built once per install.
pub struct InstallerContext {
    /// Registered repositories.
    pub repos: Vec<RepositoryRef>,
    /// Downloader writing into the install's scratch directory.
    pub downloader: Downloader,
    /// Client for repository listings.
    pub repository_client: RepositoryClient,
    /// Platform binaries are selected for.
    pub platform: Option<Platform>,
}

/// Pick the installer for an install request.
pub fn installer_for<'a>(
    context: &'a mut InstallerContext,
    repo_name: Option<&str>,
) -> Box<dyn PluginInstaller + 'a> {
    match repo_name {
        Some(repo) => Box::new(RepoInstaller { context, repo_name: repo.to_string() }),
        None => Box::new(LocalInstaller { context }),
    }
}

/// Installs from a local path or a direct URL.
pub struct LocalInstaller<'a> {
    context: &'a mut InstallerContext,
}

impl<'a> LocalInstaller<'a> {
    /// Create a local installer.
    pub fn new(context: &'a mut InstallerContext) -> Self {
        Self { context }
    }
}

impl PluginInstaller for LocalInstaller<'_> {
    fn install(&mut self, input: &str) -> PluginResult<PathBuf> {
        if has_download_prefix(input) {
            if determine_path_type(input) == PathType::Unsupported {
                return Err(PluginError::UnsupportedSource(input.to_string()));
            }

            tracing::info!(url = input, "Downloading plugin; no checksum available for direct URLs");
            let download = self.context.downloader.download_file(input)?;
            set_executable(&download.path, 0o700)?;
            return Ok(download.path);
        }

        let path = normalize_local_path(input);
        if !path.is_file() {
            return Err(PluginError::NotFound(path));
        }

        // The user's file is never modified; the staged copy is made runnable.
        let staged = stage_local_file(&path, self.context.downloader.scratch_dir())?;
        set_executable(&staged, 0o700)?;
        Ok(staged)
    }
}

/// Copy a local plugin into `scratch_dir`, keeping its file name.
fn stage_local_file(path: &Path, scratch_dir: &Path) -> PluginResult<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| PluginError::NotFound(path.to_path_buf()))?;
    std::fs::create_dir_all(scratch_dir)?;

    let staged = scratch_dir.join(file_name);
    std::fs::copy(path, &staged)?;
    tracing::debug!(source = %path.display(), staged = %staged.display(), "Staged local plugin");
    Ok(staged)
}

/// Installs a named plugin from a registered repository.
pub struct RepoInstaller<'a> {
    context: &'a mut InstallerContext,
    repo_name: String,
}

impl<'a> RepoInstaller<'a> {
    /// Create a repository installer for `repo_name`.
    pub fn new(context: &'a mut InstallerContext, repo_name: impl Into<String>) -> Self {
        Self { context, repo_name: repo_name.into() }
    }
}

impl PluginInstaller for RepoInstaller<'_> {
    fn install(&mut self, input: &str) -> PluginResult<PathBuf> {
        let repo = self
            .context
            .repos
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(&self.repo_name))
            .cloned()
            .ok_or_else(|| PluginError::RepositoryNotFound(self.repo_name.clone()))?;

        tracing::info!(plugin = input, repo = %repo.name, "Looking up plugin in repository");
        let listing = self.context.repository_client.get_plugins(std::slice::from_ref(&repo));

        if let Some(error) = listing.errors.into_iter().next() {
            return Err(PluginError::Network(error));
        }

        let not_available =
            || PluginError::NotInRepository { plugin: input.to_string(), repo: repo.name.clone() };

        let plugins = listing
            .plugins
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&repo.name))
            .map(|(_, plugins)| plugins)
            .ok_or_else(not_available)?;

        let record = plugins
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(input))
            .ok_or_else(not_available)?;

        let no_binary = |platform: &str| PluginError::NoBinaryForPlatform {
            plugin: record.name.clone(),
            platform: platform.to_string(),
        };
        let platform = self.context.platform.ok_or_else(|| no_binary(std::env::consts::OS))?;
        let binary = record.binary_for(platform).ok_or_else(|| no_binary(platform.as_str()))?;

        tracing::info!(
            plugin = %record.name,
            version = record.version_or_unknown(),
            %platform,
            "Downloading plugin binary"
        );
        let download = self.context.downloader.download_file(&binary.url)?;

        let checksum = Sha1Checksum::new(&download.path);
        if !checksum.check_sha1(&binary.checksum) {
            let actual = checksum.compute_file_sha1().unwrap_or_default();
            if let Err(e) = self.context.downloader.remove_file() {
                tracing::debug!(error = %e, "Could not remove rejected download");
            }
            return Err(PluginError::ChecksumMismatch { expected: binary.checksum.clone(), actual });
        }

        set_executable(&download.path, 0o700)?;
        Ok(download.path)
    }
}

/// Expand `~` and turn a bare file name into `./name`.
pub fn normalize_local_path(input: &str) -> PathBuf {
    let expanded = shellexpand::tilde(input);
    let path = Path::new(expanded.as_ref());

    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() && !path.is_absolute() => {
            Path::new(".").join(path)
        }
        _ => path.to_path_buf(),
    }
}

/// Set the file mode exactly.
#[cfg(unix)]
pub fn set_executable(path: &Path, mode: u32) -> PluginResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Set the file mode exactly.
#[cfg(not(unix))]
pub fn set_executable(_path: &Path, _mode: u32) -> PluginResult<()> {
    Ok(())
}
