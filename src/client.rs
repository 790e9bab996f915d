use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde_json::Value;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, HubConfig};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    APPLIANCES_PATH, AirconCommand, DEFAULT_BASE_URL, DEVICES_PATH, RATE_LIMIT_REMAINING,
    RATE_LIMIT_RESET, RawCatalog, aircon_settings_path, parse_list,
};
use crate::{Error, Result};

/// Remaining-request count below which every response logs a warning.
const RATE_LIMIT_LOW_WATER: u32 = 5;

/// The two calls the hub needs from the cloud.
pub trait RemoApi: Send + Sync + 'static {
    fn fetch_catalog(&self) -> impl Future<Output = Result<RawCatalog>> + Send;

    fn send_command(
        &self,
        appliance_id: &str,
        command: &AirconCommand,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub struct RemoClientBuilder {
    token: String,
    base_url: String,
    timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl RemoClientBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        let mut builder = Self::new(config.access_token.clone())
            .base_url(config.base_url.clone())
            .timeout(config.request_timeout());
        if let Some(log) = &config.message_log {
            builder = builder.message_log(log.mode(), log.path.clone());
        }
        builder
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<RemoClient> {
        if self.token.trim().is_empty() {
            return Err(Error::Config("access token is empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("nature-remo-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(RemoClient {
            http,
            base_url: self.base_url,
            token: self.token,
            logger,
        })
    }
}

pub struct RemoClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    logger: Option<Mutex<MessageLogger>>,
}

impl RemoClient {
    pub fn builder(token: impl Into<String>) -> RemoClientBuilder {
        RemoClientBuilder::new(token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_list(&self, path: &str) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "fetching");
        self.log(|l| l.log_request("GET", path, None));

        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let resp = check_status(resp)?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        let items = parse_list(&body)?;

        if self.logger.is_some() {
            let logged = Value::Array(items.clone());
            self.log(|l| l.log_fetch(path, status, &logged));
        }
        trace!(path, count = items.len(), "fetched");
        Ok(items)
    }

    fn log(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger {
            let mut guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard);
        }
    }
}

impl RemoApi for RemoClient {
    async fn fetch_catalog(&self) -> Result<RawCatalog> {
        let (devices, appliances) =
            tokio::try_join!(self.get_list(DEVICES_PATH), self.get_list(APPLIANCES_PATH))?;
        Ok(RawCatalog {
            devices,
            appliances,
        })
    }

    async fn send_command(&self, appliance_id: &str, command: &AirconCommand) -> Result<()> {
        let id = Uuid::new_v4();
        let path = aircon_settings_path(appliance_id);
        let url = format!("{}{}", self.base_url, path);
        debug!(%id, appliance = appliance_id, action = command.action(), "sending command");
        self.log(|l| l.log_command(id, command.action(), appliance_id, &command.to_json()));

        let result = async {
            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .form(command)
                .send()
                .await?;
            check_status(resp).map(|r| r.status().as_u16())
        }
        .await;

        match &result {
            Ok(status) => self.log(|l| l.log_command_result(id, Some(*status), None)),
            Err(e) => {
                let msg = e.to_string();
                self.log(|l| l.log_command_result(id, None, Some(&msg)));
            }
        }
        result.map(|_| ())
    }
}

fn check_status(resp: Response) -> Result<Response> {
    let remaining = resp
        .headers()
        .get(RATE_LIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u32>().ok());
    if let Some(remaining) = remaining {
        trace!(remaining, "rate limit");
        if remaining < RATE_LIMIT_LOW_WATER {
            warn!(remaining, "cloud rate limit nearly exhausted");
        }
    }

    match resp.status() {
        StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => {
            let reset = resp
                .headers()
                .get(RATE_LIMIT_RESET)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Err(Error::RateLimited { reset })
        }
        _ => Ok(resp.error_for_status()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        let err = RemoClient::builder("  ").build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = RemoClient::builder("token")
            .base_url("http://127.0.0.1:8080/")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn builder_from_config() {
        let config = HubConfig {
            access_token: "token".into(),
            base_url: "http://localhost:1234".into(),
            ..Default::default()
        };
        let client = RemoClientBuilder::from_config(&config).build().unwrap();
        assert_eq!(client.base_url(), "http://localhost:1234");
        assert!(client.logger.is_none());
    }
}
