//! Client for the camera's VAPIX HTTP API: temperature and device identity.
//!
//! Credentials come from a [`CredentialSource`] and are re-acquired when the
//! camera rejects them (see [`CredentialRefresh`]).

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::{CredentialRefresh, RemoteFetch};
use crate::error::FetchError;
use crate::types::DeviceInfo;

const TEMPERATURE_PATH: &str =
    "/axis-cgi/temperaturecontrol.cgi?device=sensor&id=2&action=query&temperatureunit=celsius";
const DEVICE_INFO_PATH: &str = "/axis-cgi/basicdeviceinfo.cgi";

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// keep the password out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait CredentialSource: Send + Sync {
    fn acquire(&self) -> Result<Credentials, FetchError>;
}

/// Username/password from two environment variables, read on every acquire.
pub struct EnvCredentials {
    pub user_var: String,
    pub password_var: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self {
            user_var: "CAMWATCH_VAPIX_USER".into(),
            password_var: "CAMWATCH_VAPIX_PASSWORD".into(),
        }
    }
}

impl CredentialSource for EnvCredentials {
    fn acquire(&self) -> Result<Credentials, FetchError> {
        let get = |var: &str| {
            std::env::var(var).map_err(|_| FetchError::Auth(format!("{var} is not set")))
        };
        Ok(Credentials {
            username: get(&self.user_var)?,
            password: get(&self.password_var)?,
        })
    }
}

/// JSON file `{"username": "...", "password": "..."}`, re-read on every
/// acquire so a rotated service account is picked up.
pub struct FileCredentials {
    pub path: PathBuf,
}

impl CredentialSource for FileCredentials {
    fn acquire(&self) -> Result<Credentials, FetchError> {
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            FetchError::Auth(format!("reading {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| FetchError::Auth(format!("parsing {}: {e}", self.path.display())))
    }
}

/// VAPIX over HTTP Basic authentication only.
///
/// Cameras ship with Digest enabled and Basic often disabled; the camera's
/// `root.Network.HTTP.AuthenticationPolicy` must allow Basic for this client.
/// A 401 whose challenge offers only Digest is reported as an auth failure
/// that names the missing scheme.
pub struct VapixClient {
    http: Client,
    base_url: String,
    context: String,
    timeout: Duration,
    source: Arc<dyn CredentialSource>,
    current: RwLock<Option<Credentials>>,
}

impl VapixClient {
    pub fn new(
        base_url: impl Into<String>,
        context: impl Into<String>,
        timeout: Duration,
        source: Arc<dyn CredentialSource>,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            context: context.into(),
            timeout,
            source,
            current: RwLock::new(None),
        })
    }

    fn credentials(&self) -> Result<Credentials, FetchError> {
        if let Some(c) = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(c.clone());
        }
        let fresh = self.source.acquire()?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(fresh.clone());
        Ok(fresh)
    }

    async fn send(&self, req: RequestBuilder) -> Result<String, FetchError> {
        let creds = self.credentials()?;
        let resp = req
            .basic_auth(&creds.username, Some(&creds.password))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            let challenges: Vec<&str> = resp
                .headers()
                .get_all(WWW_AUTHENTICATE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            return Err(FetchError::Auth(unauthorized_reason(status, &challenges)));
        }
        if status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {status}")));
        }
        resp.text()
            .await
            .map_err(|e| FetchError::Malformed(format!("reading body: {e}")))
    }

    pub async fn temperature(&self) -> Result<f64, FetchError> {
        let url = format!("{}{}", self.base_url, TEMPERATURE_PATH);
        let body = self.send(self.http.get(url)).await?;
        parse_temperature(&body)
    }

    pub async fn device_info(&self) -> Result<DeviceInfo, FetchError> {
        let url = format!("{}{}", self.base_url, DEVICE_INFO_PATH);
        let payload = serde_json::json!({
            "apiVersion": "1.0",
            "context": self.context,
            "method": "getAllProperties",
        });
        let body = self.send(self.http.post(url).json(&payload)).await?;
        parse_device_info(&body)
    }
}

#[async_trait]
impl CredentialRefresh for VapixClient {
    async fn refresh_credentials(&self) -> Result<(), FetchError> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        let fresh = self.source.acquire()?;
        info!(user = %fresh.username, "VAPIX credentials re-acquired");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(fresh);
        Ok(())
    }
}

/// Temperature query answers with the value as plain text.
/// Auth failure text for a 401, naming Digest when the camera offers nothing
/// this client can answer.
pub fn unauthorized_reason(status: StatusCode, challenges: &[&str]) -> String {
    let scheme = |c: &&str| c.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
    let basic = challenges.iter().any(|c| scheme(c) == "basic");
    let digest = challenges.iter().any(|c| scheme(c) == "digest");
    if digest && !basic {
        format!("HTTP {status}: camera requires Digest authentication, which is not supported; allow Basic on the camera")
    } else {
        format!("HTTP {status}")
    }
}

pub fn parse_temperature(body: &str) -> Result<f64, FetchError> {
    let tok = body
        .split_whitespace()
        .next()
        .ok_or_else(|| FetchError::Malformed("empty temperature response".into()))?;
    let value = tok
        .parse::<f64>()
        .map_err(|e| FetchError::Malformed(format!("temperature {tok:?}: {e}")))?;
    if !value.is_finite() {
        return Err(FetchError::Malformed(format!("temperature {tok:?} is not finite")));
    }
    if !(-50.0..=100.0).contains(&value) {
        warn!("VAPIX temperature out of expected range: {value:.2}");
    }
    Ok(value)
}

#[derive(Deserialize)]
struct DeviceInfoResponse {
    data: Option<DeviceInfoData>,
}

#[derive(Deserialize)]
struct DeviceInfoData {
    #[serde(rename = "propertyList")]
    property_list: Option<PropertyList>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PropertyList {
    serial_number: Option<String>,
    version: Option<String>,
    prod_nbr: Option<String>,
    architecture: Option<String>,
    soc: Option<String>,
}

pub fn parse_device_info(body: &str) -> Result<DeviceInfo, FetchError> {
    let resp: DeviceInfoResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("device info JSON: {e}")))?;
    let props = resp
        .data
        .and_then(|d| d.property_list)
        .ok_or_else(|| FetchError::Malformed("device info lacks data.propertyList".into()))?;
    Ok(DeviceInfo {
        serial_number: props.serial_number,
        firmware_version: props.version,
        model: props.prod_nbr,
        architecture: props.architecture,
        soc: props.soc,
    })
}

pub struct TemperatureFetch(pub Arc<VapixClient>);

#[async_trait]
impl RemoteFetch<f64> for TemperatureFetch {
    async fn fetch(&self) -> Result<f64, FetchError> {
        self.0.temperature().await
    }
}

pub struct DeviceInfoFetch(pub Arc<VapixClient>);

#[async_trait]
impl RemoteFetch<DeviceInfo> for DeviceInfoFetch {
    async fn fetch(&self) -> Result<DeviceInfo, FetchError> {
        self.0.device_info().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_parses_first_token() {
        assert_eq!(parse_temperature("46.71\n").unwrap(), 46.71);
        assert_eq!(parse_temperature("  -3.5 C").unwrap(), -3.5);
        assert!(matches!(parse_temperature(""), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_temperature("n/a"), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_temperature("NaN"), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn device_info_reads_property_list() {
        let body = r#"{"apiVersion":"1.0","data":{"propertyList":{
            "SerialNumber":"ACCC8E000001","Version":"11.9.60","ProdNbr":"Q6135-LE",
            "Architecture":"aarch64","Soc":"Axis Artpec-8"}}}"#;
        let info = parse_device_info(body).unwrap();
        assert_eq!(info.serial_number.as_deref(), Some("ACCC8E000001"));
        assert_eq!(info.firmware_version.as_deref(), Some("11.9.60"));
        assert_eq!(info.model.as_deref(), Some("Q6135-LE"));
        assert_eq!(info.soc.as_deref(), Some("Axis Artpec-8"));
    }

    #[test]
    fn device_info_error_body_is_malformed() {
        let body = r#"{"apiVersion":"1.0","error":{"code":2002,"message":"bad"}}"#;
        assert!(matches!(parse_device_info(body), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_device_info("<html>"), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn digest_only_challenge_is_named() {
        let digest = r#"Digest realm="AXIS_ACCC8E000001", nonce="abc", qop="auth""#;
        let msg = unauthorized_reason(StatusCode::UNAUTHORIZED, &[digest]);
        assert!(msg.contains("requires Digest"), "{msg}");

        let both = unauthorized_reason(StatusCode::UNAUTHORIZED, &[digest, r#"Basic realm="x""#]);
        assert_eq!(both, "HTTP 401 Unauthorized");
        assert_eq!(unauthorized_reason(StatusCode::UNAUTHORIZED, &[]), "HTTP 401 Unauthorized");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let c = Credentials {
            username: "svc".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{c:?}").contains("hunter2"));
    }
}
