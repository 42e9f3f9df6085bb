//! Update configuration
//!
//! [`UpdateConfig`] holds the paths and policy knobs of a run. [`ConfigLoader`]
//! reads the `KEY=VALUE` file from the update medium into an [`EnvStore`],
//! after checking its `#<ver=X.Y>` header against [`CONFIG_VERSION`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::env::EnvStore;
use crate::error::ConfigError;
use crate::target::{DeviceFamily, Role};

/// Config file format version this build understands.
pub const CONFIG_VERSION: &str = "1.0";

const HEADER_PREFIX: &str = "#<ver=";
const HEADER_SUFFIX: &str = ">";

/// Paths and policy of an update run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Mounted root of the update medium
    pub medium: PathBuf,

    /// Host directory device paths are mapped into
    pub sysroot: PathBuf,

    /// Config file name relative to the medium root
    pub config_file: String,

    /// Expected `#<ver=...>` header version
    pub expected_version: String,

    /// Scratch mount point used by file and device tree steps
    pub scratch_mount: String,

    /// Directory holding the run log on the device
    pub work_dir: String,

    /// Log file name inside the work directory and on the medium
    pub log_file: String,

    /// Digest algorithm for sidecar hash files
    pub digest: String,

    /// Device family used when `BB_TARGET_DEV` is unset
    pub default_bootloader_family: DeviceFamily,

    /// Device family used when `OS_TARGET_DEV` is unset
    pub default_os_family: DeviceFamily,

    /// Bootloader images up to this size are read into memory once
    pub preload_limit: u64,

    /// Block until the medium is removed once the run is finished
    pub halt_on_completion: bool,

    /// Poll interval while waiting for medium removal
    #[serde(with = "duration_millis")]
    pub media_poll_interval: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            medium: PathBuf::from("/mnt/usb"),
            sysroot: PathBuf::from("/"),
            config_file: "swupdate.cfg".to_string(),
            expected_version: CONFIG_VERSION.to_string(),
            scratch_mount: "/tmp/swu".to_string(),
            work_dir: "/tmp".to_string(),
            log_file: "swu.log".to_string(),
            digest: "md5".to_string(),
            default_bootloader_family: DeviceFamily::Flash,
            default_os_family: DeviceFamily::Emmc,
            preload_limit: 4 * 1024 * 1024,
            halt_on_completion: true,
            media_poll_interval: Duration::from_millis(500),
        }
    }
}

impl UpdateConfig {
    /// Config with the given medium root and defaults elsewhere.
    pub fn for_medium(medium: impl Into<PathBuf>) -> Self {
        Self {
            medium: medium.into(),
            ..Self::default()
        }
    }

    /// Full path of the config file on the medium.
    pub fn config_path(&self) -> PathBuf {
        self.medium.join(&self.config_file)
    }

    /// Device family used when the role's selector key is unset.
    pub fn default_family(&self, role: Role) -> DeviceFamily {
        match role {
            Role::Bootloader => self.default_bootloader_family,
            Role::Os => self.default_os_family,
        }
    }

    /// Resolve an image path from the config file against the medium root.
    pub fn medium_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.medium.join(path)
        }
    }

    /// Device-side path of the run log.
    pub fn log_path(&self) -> String {
        format!("{}/{}", self.work_dir.trim_end_matches('/'), self.log_file)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Parsed config file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version from the header line
    pub version: String,
    /// Entries in file order
    pub entries: Vec<(String, String)>,
}

impl ConfigFile {
    /// Parse config text, checking the header first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingHeader`] when the first line is not a
    /// version header and [`ConfigError::VersionMismatch`] when the version
    /// differs from `expected_version`. No entry is parsed in either case.
    pub fn parse(text: &str, expected_version: &str) -> Result<Self, ConfigError> {
        let mut lines = text.lines();
        let header = lines.next().unwrap_or_default();
        let version = parse_header(header)?;
        if version != expected_version {
            return Err(ConfigError::VersionMismatch {
                expected: expected_version.to_string(),
                found: version.to_string(),
            });
        }

        let mut entries = Vec::new();
        for (index, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    entries.push((key.trim().to_string(), value.trim().to_string()));
                }
                _ => warn!("Ignoring malformed config line {}: {:?}", index + 2, line),
            }
        }

        Ok(Self {
            version: version.to_string(),
            entries,
        })
    }

    /// Value of the last entry with `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_header(line: &str) -> Result<&str, ConfigError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    line.strip_prefix(HEADER_PREFIX)
        .and_then(|rest| rest.strip_suffix(HEADER_SUFFIX))
        .filter(|version| !version.is_empty())
        .ok_or_else(|| ConfigError::MissingHeader(line.to_string()))
}

/// Loads the update config file into an environment store
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    expected_version: String,
}

impl ConfigLoader {
    /// Create a loader accepting `expected_version`.
    pub fn new(expected_version: impl Into<String>) -> Self {
        Self {
            expected_version: expected_version.into(),
        }
    }

    /// Read `path`, check its version header and store every entry in `env`.
    ///
    /// The whole file is parsed before anything is stored, so a rejected
    /// file leaves `env` untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is missing, unreadable or fails
    /// the version gate.
    pub fn load(&self, path: &Path, env: &mut dyn EnvStore) -> Result<ConfigFile, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let file = ConfigFile::parse(&text, &self.expected_version)?;
        info!(
            "Loaded {} (version {}, {} entries)",
            path.display(),
            file.version,
            file.entries.len()
        );

        for (key, value) in &file.entries {
            debug!("{}={}", key, value);
            env.set(key, value);
        }

        Ok(file)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(CONFIG_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{MemoryEnv, keys};

    #[test]
    fn test_parse_entries_and_comments() -> Result<(), ConfigError> {
        let text =
            "#<ver=1.0>\n# kernel only\nKERNEL_IMAGE=images/zImage\n\nOS_TARGET_DEV = mmc \n";
        let file = ConfigFile::parse(text, "1.0")?;
        assert_eq!(file.version, "1.0");
        assert_eq!(file.get(keys::KERNEL_IMAGE), Some("images/zImage"));
        assert_eq!(file.get(keys::OS_TARGET_DEV), Some("mmc"));
        assert_eq!(file.entries.len(), 2);
        Ok(())
    }

    #[test]
    fn test_last_line_without_newline() -> Result<(), ConfigError> {
        let file = ConfigFile::parse("#<ver=1.0>\nA=1\nB=2", "1.0")?;
        assert_eq!(file.get("B"), Some("2"));
        Ok(())
    }

    #[test]
    fn test_crlf_header() -> Result<(), ConfigError> {
        let file = ConfigFile::parse("#<ver=1.0>\r\nA=1\r\n", "1.0")?;
        assert_eq!(file.get("A"), Some("1"));
        Ok(())
    }

    #[test]
    fn test_missing_header_rejected() {
        let result = ConfigFile::parse("KERNEL_IMAGE=zImage\n#<ver=1.0>\n", "1.0");
        assert!(matches!(result, Err(ConfigError::MissingHeader(_))));

        let result = ConfigFile::parse("", "1.0");
        assert!(matches!(result, Err(ConfigError::MissingHeader(_))));

        let result = ConfigFile::parse("#<ver=>\n", "1.0");
        assert!(matches!(result, Err(ConfigError::MissingHeader(_))));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let result = ConfigFile::parse("#<ver=2.0>\nA=1\n", "1.0");
        assert!(
            matches!(
                &result,
                Err(ConfigError::VersionMismatch { expected, found })
                    if expected == "1.0" && found == "2.0"
            ),
            "{result:?}"
        );
    }

    #[test]
    fn test_duplicate_keys_last_wins() -> Result<(), ConfigError> {
        let file = ConfigFile::parse("#<ver=1.0>\nA=1\nA=2\n", "1.0")?;
        assert_eq!(file.get("A"), Some("2"));
        Ok(())
    }

    #[test]
    fn test_value_may_contain_equals() -> Result<(), ConfigError> {
        let file = ConfigFile::parse("#<ver=1.0>\nBOOTARGS=console=ttymxc0\n", "1.0")?;
        assert_eq!(file.get("BOOTARGS"), Some("console=ttymxc0"));
        Ok(())
    }

    #[test]
    fn test_loader_rejects_without_touching_env() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("swupdate.cfg");
        std::fs::write(&path, "#<ver=0.9>\nKERNEL_IMAGE=zImage\n")?;

        let mut env = MemoryEnv::new();
        let result = ConfigLoader::default().load(&path, &mut env);
        assert!(matches!(result, Err(ConfigError::VersionMismatch { .. })));
        assert!(env.is_empty());
        Ok(())
    }

    #[test]
    fn test_loader_missing_file() {
        let mut env = MemoryEnv::new();
        let result = ConfigLoader::default().load(Path::new("/nonexistent/swupdate.cfg"), &mut env);
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_medium_path_resolution() {
        let config = UpdateConfig::for_medium("/mnt/usb");
        assert_eq!(
            config.medium_path("images/zImage"),
            PathBuf::from("/mnt/usb/images/zImage")
        );
        assert_eq!(config.medium_path("/abs/zImage"), PathBuf::from("/abs/zImage"));
        assert_eq!(config.log_path(), "/tmp/swu.log");
    }

    #[test]
    fn test_default_config() {
        let config = UpdateConfig::default();
        assert_eq!(config.expected_version, CONFIG_VERSION);
        assert_eq!(config.default_family(Role::Bootloader), DeviceFamily::Flash);
        assert_eq!(config.default_family(Role::Os), DeviceFamily::Emmc);
        assert_eq!(config.digest, "md5");
        assert!(config.halt_on_completion);
    }

    #[test]
    fn test_config_serde_roundtrip() -> Result<(), serde_json::Error> {
        let config = UpdateConfig::for_medium("/media/sd");
        let json = serde_json::to_string(&config)?;
        let back: UpdateConfig = serde_json::from_str(&json)?;
        assert_eq!(back, config);
        Ok(())
    }
}
