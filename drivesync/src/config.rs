use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use drive_api::ROOT_HREF;

const DEFAULT_SYNC_DIR_NAME: &str = "CloudDrive";
const DEFAULT_API_URL: &str = "https://cloud-api.yandex.net";
const DEFAULT_PAGE_SIZE: u32 = 100;
pub const STATE_FILE_NAME: &str = ".drivesync_state.json";

/// Settings of one sync pass, read from `DRIVESYNC_*` environment variables.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub sync_dir: PathBuf,
    pub remote_root: String,
    pub state_file: PathBuf,
    pub api_url: String,
    pub token: Option<String>,
    pub page_size: u32,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Ok(Self::from_lookup(&home, |name| std::env::var(name).ok()))
    }

    pub fn from_lookup(home: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sync_dir = lookup("DRIVESYNC_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join(DEFAULT_SYNC_DIR_NAME));
        let state_file = lookup("DRIVESYNC_STATE_FILE")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| sync_dir.join(STATE_FILE_NAME));
        let remote_root = lookup("DRIVESYNC_REMOTE_ROOT")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| ROOT_HREF.to_string());
        let api_url = lookup("DRIVESYNC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let token = lookup("DRIVESYNC_TOKEN").filter(|value| !value.trim().is_empty());
        let page_size = lookup("DRIVESYNC_PAGE_SIZE")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Self {
            sync_dir,
            remote_root,
            state_file,
            api_url,
            token,
            page_size,
        }
    }

    pub fn require_token(&self) -> anyhow::Result<&str> {
        self.token
            .as_deref()
            .context("DRIVESYNC_TOKEN is not set; an OAuth token is required")
    }

    /// Name the local scan must skip, when the state file lives inside the
    /// sync directory.
    pub fn state_file_name(&self) -> Option<String> {
        let relative = self.state_file.strip_prefix(&self.sync_dir).ok()?;
        let mut components = relative.components();
        let name = components.next()?.as_os_str().to_str()?.to_string();
        Some(name)
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("sync_dir", &self.sync_dir)
            .field("remote_root", &self.remote_root)
            .field("state_file", &self.state_file)
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("page_size", &self.page_size)
            .finish()
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> SyncConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        SyncConfig::from_lookup(Path::new("/home/u"), |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_live_under_home() {
        let config = config(&[]);
        assert_eq!(config.sync_dir, PathBuf::from("/home/u/CloudDrive"));
        assert_eq!(
            config.state_file,
            PathBuf::from("/home/u/CloudDrive/.drivesync_state.json")
        );
        assert_eq!(config.remote_root, "disk:/");
        assert_eq!(config.api_url, "https://cloud-api.yandex.net");
        assert_eq!(config.page_size, 100);
        assert!(config.token.is_none());
        assert!(config.require_token().is_err());
    }

    #[test]
    fn tilde_is_expanded() {
        let config = config(&[
            ("DRIVESYNC_DIR", "~/Drive"),
            ("DRIVESYNC_STATE_FILE", "~/.local/state/drivesync.json"),
        ]);
        assert_eq!(config.sync_dir, PathBuf::from("/home/u/Drive"));
        assert_eq!(
            config.state_file,
            PathBuf::from("/home/u/.local/state/drivesync.json")
        );
        assert_eq!(config.state_file_name(), None);
    }

    #[test]
    fn state_file_inside_sync_dir_is_ignored_by_name() {
        let config = config(&[("DRIVESYNC_DIR", "/data/drive")]);
        assert_eq!(
            config.state_file_name().as_deref(),
            Some(".drivesync_state.json")
        );
    }

    #[test]
    fn invalid_page_size_falls_back() {
        assert_eq!(config(&[("DRIVESYNC_PAGE_SIZE", "0")]).page_size, 100);
        assert_eq!(config(&[("DRIVESYNC_PAGE_SIZE", "abc")]).page_size, 100);
        assert_eq!(config(&[("DRIVESYNC_PAGE_SIZE", "25")]).page_size, 25);
    }

    #[test]
    fn token_is_redacted_in_debug_output() {
        let config = config(&[("DRIVESYNC_TOKEN", "secret-token")]);
        assert_eq!(config.require_token().unwrap(), "secret-token");
        assert!(!format!("{config:?}").contains("secret-token"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = config(&[("DRIVESYNC_TOKEN", "  "), ("DRIVESYNC_REMOTE_ROOT", "")]);
        assert!(config.token.is_none());
        assert_eq!(config.remote_root, "disk:/");
    }
}
