use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::call::{Call, DEFAULT_TIMEOUT_SECONDS};
use crate::http::request::RequestMessage;
use crate::multi::PollSettings;
use crate::transport::{TcpConfig, TcpEngine};

const CONFIG_ENV: &str = "HTTPCALL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "httpcall.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub transport: TransportConfig,
    pub defaults: CallDefaults,
    pub requests: Vec<RequestConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Calls queued before the executor flushes
    pub buffer_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { buffer_size: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub user_agent: String,
    pub connect_timeout_ms: u64,
    /// Upper bound of one readiness wait in the driver loop
    pub wait_timeout_ms: u64,
    /// Sleep between pumps when readiness waits are unavailable
    pub fallback_poll_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: TcpConfig::default().user_agent,
            connect_timeout_ms: 5000,
            wait_timeout_ms: 1000,
            fallback_poll_interval_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallDefaults {
    pub timeout_seconds: f64,
    pub debug: bool,
}

impl Default for CallDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            debug: false,
        }
    }
}

/// One request of the batch runner.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    pub key: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub get_params: BTreeMap<String, String>,
    #[serde(default)]
    pub post_params: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_seconds: Option<f64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestConfig {
    pub fn to_request(&self) -> anyhow::Result<RequestMessage> {
        let mut request = RequestMessage::create(&self.method, self.uri.clone())
            .with_context(|| format!("invalid request {}", self.label()))?;

        for (field, value) in &self.headers {
            request.set_header(field, value.clone());
        }
        request
            .set_get_params(self.get_params.clone())
            .set_post_params(self.post_params.clone());
        if let Some(body) = &self.body {
            request.set_raw_body(body.as_bytes());
        }

        Ok(request)
    }

    /// Key if set, otherwise `METHOD uri`.
    pub fn label(&self) -> String {
        match &self.key {
            Some(key) => key.clone(),
            None => format!("{} {}", self.method.to_ascii_uppercase(), self.uri),
        }
    }
}

impl Config {
    /// Loads the file named by `HTTPCALL_CONFIG`, then applies environment
    /// overrides. A missing default file yields the defaults; a missing file
    /// that was named explicitly is an error.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            Err(_) => Self::default(),
        };

        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(size) = std::env::var("HTTPCALL_BUFFER_SIZE") {
            self.executor.buffer_size = size
                .trim()
                .parse()
                .with_context(|| format!("HTTPCALL_BUFFER_SIZE is not a number: {:?}", size))?;
        }
        if let Ok(agent) = std::env::var("HTTPCALL_USER_AGENT") {
            self.transport.user_agent = agent;
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TcpConfig {
        TcpConfig {
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
            user_agent: self.transport.user_agent.clone(),
            ..TcpConfig::default()
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            wait_timeout: Duration::from_millis(self.transport.wait_timeout_ms),
            fallback_interval: Duration::from_millis(self.transport.fallback_poll_interval_ms),
        }
    }

    /// Builds a ready-to-submit call with the configured defaults applied.
    pub fn build_call(&self, engine: &TcpEngine, request: &RequestConfig) -> anyhow::Result<Call> {
        let mut call = Call::with_engine(request.to_request()?, engine.clone());
        call.set_timeout_seconds(request.timeout_seconds.unwrap_or(self.defaults.timeout_seconds))
            .set_debug_mode(self.defaults.debug)
            .set_poll_settings(self.poll_settings());
        Ok(call)
    }
}
