use anyhow::{Context, Result};
use reqwest::Url;
use std::{env, path::PathBuf, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Remote visit API configuration
    pub api: ApiConfig,

    /// Reachability probe configuration
    pub connectivity: ConnectivityConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ConnectivityConfig {
    /// `host:port` probed with a TCP connect; `None` disables active probing
    pub target: Option<String>,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub data_dir: PathBuf,
    pub store_file: PathBuf,
}

impl AppConfig {
    /// Load and validate all configuration from environment variables
    pub fn load() -> Result<Self> {
        let api = ApiConfig::load()?;
        let connectivity = ConnectivityConfig::load(&api.base_url)?;
        let paths = PathConfig::load()?;

        Ok(Self {
            api,
            connectivity,
            paths,
        })
    }
}

impl ApiConfig {
    const DEFAULT_BASE_URL: &str = "http://localhost:5000/";
    const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

    fn load() -> Result<Self> {
        let raw = env::var("API_BASE_URL").unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&raw).context("failed to parse API_BASE_URL: invalid url")?;

        anyhow::ensure!(
            !base_url.cannot_be_a_base(),
            "failed to parse API_BASE_URL: {base_url} cannot be used as base url"
        );

        let request_timeout = Duration::from_secs(u64_from_env(
            "REQUEST_TIMEOUT_SECS",
            Self::DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);

        Ok(Self {
            base_url,
            request_timeout,
        })
    }
}

impl ConnectivityConfig {
    const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;
    const DEFAULT_POLL_SECS: u64 = 5;

    fn load(base_url: &Url) -> Result<Self> {
        let target = match env::var("CONNECTIVITY_TARGET") {
            Ok(target) if target.is_empty() => None,
            Ok(target) => Some(target),
            Err(_) => target_from_url(base_url),
        };

        let probe_timeout = Duration::from_millis(u64_from_env(
            "CONNECTIVITY_PROBE_TIMEOUT_MS",
            Self::DEFAULT_PROBE_TIMEOUT_MS,
        )?);
        let poll_interval =
            Duration::from_secs(u64_from_env("CONNECTIVITY_POLL_SECS", Self::DEFAULT_POLL_SECS)?);

        Ok(Self {
            target,
            probe_timeout,
            poll_interval,
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let data_dir: PathBuf = env::var("DATA_DIR")
            .unwrap_or_else(|_| "./data".to_string())
            .into();

        std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;

        let store_file = data_dir.join("local_store.json");

        Ok(Self {
            data_dir,
            store_file,
        })
    }
}

/// Derive the `host:port` reachability target from the API base url
pub fn target_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

fn u64_from_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(default),
    }
}
