use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use bytesize::ByteSize;
use dotenvy::dotenv;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use upld::{PartVerification, ProfileRoutes, UploadConfig, UploadSettings, builtin_profiles};
use url::Url;

pub const KEYRING_SERVICE: &str = "upld-api-token";
pub const KEYRING_USER: &str = "upld";
pub const DEFAULT_PROFILE: &str = "media";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    /// e.g. "90s" or "5m"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_threshold: Option<ByteSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size: Option<ByteSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_parts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<PartVerification>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ProfileRoutes>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    profile: Option<String>,
    base_url: Option<Url>,
    api_token: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub base_url: Option<Url>,
    pub default_profile: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub settings: UploadSettings,
    pub profiles: BTreeMap<String, ProfileRoutes>,
}

impl Config {
    /// Endpoints of `name`, or of the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, UploadConfig)> {
        let name = name.unwrap_or(self.default_profile.as_str());

        let routes = self.profiles.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown profile '{}' (available: {})",
                name,
                self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;

        let base_url = self.base_url.as_ref().ok_or(anyhow!(
            "No base URL provided; set base_url in the config file or UPLD_BASE_URL"
        ))?;

        let endpoints = routes
            .resolve(base_url)
            .with_context(|| format!("Invalid routes for profile '{}'", name))?;

        Ok((name.to_string(), endpoints))
    }
}

fn merge_config(
    base: ConfigFile,
    override_config: ConfigEnv,
    token_lookup: impl FnOnce() -> Option<String>,
) -> Result<Config> {
    let base_url = override_config.base_url.or(base.base_url);
    let default_profile = override_config
        .profile
        .or(base.default_profile)
        .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
    let api_token = override_config.api_token.or_else(token_lookup);

    let request_timeout = match base.request_timeout {
        Some(timeout) => humantime::parse_duration(&timeout)
            .with_context(|| format!("Invalid request_timeout '{}'", timeout))?,
        None => DEFAULT_REQUEST_TIMEOUT,
    };

    let defaults = UploadSettings::default();
    let settings = UploadSettings {
        multipart_threshold: base
            .multipart_threshold
            .map(|size| size.as_u64())
            .unwrap_or(defaults.multipart_threshold),
        part_size: base
            .part_size
            .map(|size| size.as_u64())
            .unwrap_or(defaults.part_size),
        max_concurrent_parts: base
            .max_concurrent_parts
            .unwrap_or(defaults.max_concurrent_parts),
        verification: base.verification.unwrap_or(defaults.verification),
    };

    if settings.multipart_threshold == 0 {
        bail!("multipart_threshold must be at least 1 byte");
    }

    if settings.max_concurrent_parts == 0 {
        bail!("max_concurrent_parts must be at least 1");
    }

    let mut profiles: BTreeMap<String, ProfileRoutes> = builtin_profiles()
        .into_iter()
        .map(|(name, routes)| (name.to_string(), routes))
        .collect();
    profiles.extend(base.profiles);

    Ok(Config {
        base_url,
        default_profile,
        api_token,
        request_timeout,
        settings,
        profiles,
    })
}

fn keyring_token() -> Option<String> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()?;
    let secret = entry.get_secret().ok()?;
    String::from_utf8(secret).ok()
}

pub fn config_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("org", "upld", "upld")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(_) => Ok(ConfigFile::default()),
    }
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed("UPLD_")
        .from_env::<ConfigEnv>()
        .unwrap_or_default();

    let file_config = load_config_file(&config_path()?)?;

    merge_config(file_config, env_config, keyring_token)
}

pub fn write_config(config: &ConfigFile) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn set_api_token_keyring(api_token: String) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    entry.set_secret(api_token.as_bytes())?;
    println!("API token set for use with upld");
    Ok(())
}
