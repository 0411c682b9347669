//! Mapping from the running OS/architecture to repository platform names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Platform identifier used by plugin repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Osx,
    Linux32,
    Linux64,
    Win32,
    Win64,
}

impl Platform {
    /// Repository name of this platform.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Osx => "osx",
            Self::Linux32 => "linux32",
            Self::Linux64 => "linux64",
            Self::Win32 => "win32",
            Self::Win64 => "win64",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "osx" => Ok(Self::Osx),
            "linux32" => Ok(Self::Linux32),
            "linux64" => Ok(Self::Linux64),
            "win32" => Ok(Self::Win32),
            "win64" => Ok(Self::Win64),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// Architecture selector for a table row.
#[derive(Debug, Clone, Copy)]
enum Arch {
    Any,
    Is(&'static str),
}

/// `(os, arch, platform)` rows, first match wins.
///
/// OS and arch names are the values of `std::env::consts::{OS, ARCH}`.
const PLATFORM_TABLE: &[(&str, Arch, Platform)] = &[
    ("macos", Arch::Any, Platform::Osx),
    ("linux", Arch::Is("x86"), Platform::Linux32),
    ("linux", Arch::Any, Platform::Linux64),
    ("windows", Arch::Is("x86"), Platform::Win32),
    ("windows", Arch::Any, Platform::Win64),
];

/// Look up the repository platform for an OS/architecture pair.
pub fn platform_for(os: &str, arch: &str) -> Option<Platform> {
    let os = if os == "darwin" { "macos" } else { os };
    let arch = if arch == "386" { "x86" } else { arch };

    PLATFORM_TABLE
        .iter()
        .find(|(row_os, row_arch, _)| {
            *row_os == os
                && match row_arch {
                    Arch::Any => true,
                    Arch::Is(a) => *a == arch,
                }
        })
        .map(|(_, _, platform)| *platform)
}

/// Platform of the running binary, if it is one repositories publish for.
pub fn current_platform() -> Option<Platform> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_table() {
        assert_eq!(platform_for("macos", "x86_64"), Some(Platform::Osx));
        assert_eq!(platform_for("macos", "aarch64"), Some(Platform::Osx));
        assert_eq!(platform_for("darwin", "amd64"), Some(Platform::Osx));
        assert_eq!(platform_for("linux", "x86"), Some(Platform::Linux32));
        assert_eq!(platform_for("linux", "386"), Some(Platform::Linux32));
        assert_eq!(platform_for("linux", "x86_64"), Some(Platform::Linux64));
        assert_eq!(platform_for("linux", "aarch64"), Some(Platform::Linux64));
        assert_eq!(platform_for("windows", "x86"), Some(Platform::Win32));
        assert_eq!(platform_for("windows", "x86_64"), Some(Platform::Win64));
        assert_eq!(platform_for("freebsd", "x86_64"), None);
    }

    #[test]
    fn test_platform_round_trip_names() {
        for name in ["osx", "linux32", "linux64", "win32", "win64"] {
            let platform: Platform = name.parse().unwrap();
            assert_eq!(platform.to_string(), name);
        }
        assert!("win128".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_serde() {
        let platform: Platform = serde_json::from_str("\"linux64\"").unwrap();
        assert_eq!(platform, Platform::Linux64);
        assert!(serde_json::from_str::<Platform>("\"amiga\"").is_err());
    }
}
