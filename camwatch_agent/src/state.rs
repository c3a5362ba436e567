//! Shared agent state: the local sampler, remote caches and request counters.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tracing::info;

use crate::cache::{CachePolicy, CredentialRefresh, RemoteCache};
use crate::config::AgentConfig;
use crate::error::FetchError;
use crate::health::Check;
use crate::logbuf::LogBuffer;
use crate::sampler::LocalSampler;
use crate::source::SystemSource;
use crate::types::DeviceInfo;
use crate::vapix::{
    CredentialSource, DeviceInfoFetch, EnvCredentials, FileCredentials, TemperatureFetch,
    VapixClient,
};

pub type TemperatureCache = RemoteCache<f64>;
pub type DeviceInfoCache = RemoteCache<DeviceInfo>;

#[derive(Clone)]
pub struct AppState {
    pub service: String,
    pub hostname: String,

    pub sampler: Arc<LocalSampler>,
    // None when the camera API is disabled
    pub temperature: Option<TemperatureCache>,
    pub device_info: Option<DeviceInfoCache>,

    pub checks: Arc<Vec<Check>>,
    pub dependency_paths: Arc<Vec<PathBuf>>,

    pub logs: Arc<LogBuffer>,
    pub http_requests: Arc<AtomicU64>,
}

impl AppState {
    /// State over an arbitrary sampler and caches; used by tests with fakes.
    pub fn new(
        service: impl Into<String>,
        sampler: LocalSampler,
        temperature: Option<TemperatureCache>,
        device_info: Option<DeviceInfoCache>,
        checks: Vec<Check>,
        logs: Arc<LogBuffer>,
    ) -> Self {
        Self {
            service: service.into(),
            hostname: local_hostname(),
            sampler: Arc::new(sampler),
            temperature,
            device_info,
            checks: Arc::new(checks),
            dependency_paths: Arc::new(Vec::new()),
            logs,
            http_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_dependency_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.dependency_paths = Arc::new(paths);
        self
    }

    /// Production wiring: sysinfo sampler plus VAPIX-backed caches.
    pub fn from_config(
        cfg: &AgentConfig,
        mut checks: Vec<Check>,
        logs: Arc<LogBuffer>,
    ) -> Result<Self, FetchError> {
        let sampler = LocalSampler::new(Box::new(SystemSource::new(
            cfg.proc_root.clone(),
            cfg.disk_path.clone(),
        )));

        let (temperature, device_info) = if cfg.vapix_enabled {
            let (t, d) = vapix_caches(cfg)?;
            (Some(t), Some(d))
        } else {
            info!("VAPIX disabled; temperature and device info are not collected");
            checks.retain(|c| c.name != "temperature_celsius");
            (None, None)
        };

        Ok(Self::new(
            cfg.service_name.clone(),
            sampler,
            temperature,
            device_info,
            checks,
            logs,
        )
        .with_dependency_paths(cfg.dependency_paths.clone()))
    }
}

fn vapix_caches(cfg: &AgentConfig) -> Result<(TemperatureCache, DeviceInfoCache), FetchError> {
    let source: Arc<dyn CredentialSource> = match &cfg.credentials_file {
        Some(path) => Arc::new(FileCredentials { path: path.clone() }),
        None => Arc::new(EnvCredentials::default()),
    };
    let client = Arc::new(VapixClient::new(
        cfg.vapix_url.clone(),
        cfg.service_name.clone(),
        cfg.fetch_timeout,
        source,
    )?);
    let refresher: Arc<dyn CredentialRefresh> = client.clone();

    let temperature = RemoteCache::new(
        "temperature",
        CachePolicy {
            ttl: cfg.temperature_ttl,
            fetch_timeout: cfg.fetch_timeout,
        },
        Arc::new(TemperatureFetch(Arc::clone(&client))),
        Some(Arc::clone(&refresher)),
    );
    let device_info = RemoteCache::new(
        "device_info",
        CachePolicy {
            ttl: cfg.device_info_ttl,
            fetch_timeout: cfg.fetch_timeout,
        },
        Arc::new(DeviceInfoFetch(client)),
        Some(refresher),
    );
    info!(url = %cfg.vapix_url, "VAPIX caches configured");
    Ok((temperature, device_info))
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}
