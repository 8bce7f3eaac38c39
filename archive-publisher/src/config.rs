// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Publisher configuration.

A [PublisherConfig] is threaded through every operation instead of relying on
ambient process state. It is typically deserialized from a YAML document:

```yaml
database: /srv/publisher/db.yaml
expected_umask: 0o022
signing_root: /srv/publisher/signing
uefi_auto_generate_keys: true
tools:
  sbsign: /usr/bin/sbsign
```
*/

use {
    crate::{
        error::{PublisherError, Result},
        model::Archive,
    },
    serde::Deserialize,
    std::path::{Path, PathBuf},
};

#[cfg(all(unix, not(target_os = "linux")))]
use {once_cell::sync::Lazy, std::sync::Mutex};

/// Locations of external programs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub sbsign: PathBuf,
    pub openssl: PathBuf,
    pub apt_ftparchive: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            sbsign: PathBuf::from("sbsign"),
            openssl: PathBuf::from("openssl"),
            apt_ftparchive: PathBuf::from("apt-ftparchive"),
        }
    }
}

/// Static fields for generated `Release` files.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
    pub origin: Option<String>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// YAML publication database used by the command line tool.
    pub database: Option<PathBuf>,

    /// Umask the custom upload installer expects before creating directory symlinks.
    #[serde(deserialize_with = "deserialize_mode")]
    pub expected_umask: u32,

    /// Root under which per-archive signing directories live.
    pub signing_root: Option<PathBuf>,

    /// Generate UEFI signing keys for archives lacking them.
    pub uefi_auto_generate_keys: bool,

    pub tools: ToolPaths,

    pub release: ReleaseSettings,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            database: None,
            expected_umask: 0o022,
            signing_root: None,
            uefi_auto_generate_keys: false,
            tools: ToolPaths::default(),
            release: ReleaseSettings::default(),
        }
    }
}

impl PublisherConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fh = std::fs::File::open(path).map_err(|e| PublisherError::io_path(path, e))?;

        Ok(serde_yaml::from_reader(fh)?)
    }

    /// Directory holding the signing keys of an archive.
    ///
    /// An explicit per-archive directory wins over `<signing_root>/<archive name>`.
    pub fn archive_signing_dir(&self, archive: &Archive) -> Option<PathBuf> {
        archive
            .signing_dir
            .clone()
            .or_else(|| self.signing_root.as_ref().map(|root| root.join(&archive.name)))
    }
}

/// Accept modes as integers or as octal strings like `0o022` / `022`.
fn deserialize_mode<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mode {
        Int(u32),
        Str(String),
    }

    match Mode::deserialize(deserializer)? {
        Mode::Int(v) => Ok(v),
        Mode::Str(s) => {
            let digits = s.trim_start_matches("0o");
            u32::from_str_radix(digits, 8).map_err(serde::de::Error::custom)
        }
    }
}

/// Read the umask from `/proc/self/status`.
#[cfg(unix)]
fn proc_umask() -> Result<u32> {
    let path = Path::new("/proc/self/status");
    let status = std::fs::read_to_string(path).map_err(|e| PublisherError::io_path(path, e))?;

    status
        .lines()
        .find_map(|line| line.strip_prefix("Umask:"))
        .and_then(|v| u32::from_str_radix(v.trim(), 8).ok())
        .ok_or_else(|| {
            PublisherError::UmaskUnavailable(format!("no Umask line in {}", path.display()))
        })
}

/// Obtain the umask of the current process.
///
/// The kernel exposes the umask without modifying it.
#[cfg(target_os = "linux")]
pub fn current_umask() -> Result<u32> {
    proc_umask()
}

/// Obtain the umask of the current process.
///
/// Without `Umask:` in `/proc/self/status`, the only way to read the umask is to set
/// it and put it back. That briefly changes a process-wide setting, so files created
/// by other threads in the meantime get mode bits derived from `0o077`. Callers are
/// serialized, but other threads aren't; this is a last resort.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn current_umask() -> Result<u32> {
    static UMASK_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    if let Ok(value) = proc_umask() {
        return Ok(value);
    }

    let _guard = UMASK_LOCK
        .lock()
        .map_err(|_| PublisherError::UmaskUnavailable("umask lock poisoned".into()))?;

    // SAFETY: umask(2) can't fail. The original mask is restored before returning.
    let mask = unsafe {
        let mask = libc::umask(0o077);
        libc::umask(mask);
        mask
    };

    Ok(mask as u32)
}

#[cfg(not(unix))]
pub fn current_umask() -> Result<u32> {
    Ok(0o022)
}
