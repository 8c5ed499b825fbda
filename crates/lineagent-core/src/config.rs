use crate::types::{OverflowPolicy, ReplyPolicy, LINE_MAX_TEXT_CHARS};
use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_LINE_API_BASE_URL: &str = "https://api.line.me";
pub const DEFAULT_AGENT_REGION: &str = "us-east-1";
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, something went wrong while preparing a reply. Please try again.";

/// Main bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub line: LineConfig,
    pub agent: AgentRuntimeConfig,
    pub reply: ReplyConfig,
    pub dispatch: DispatchConfig,
    /// Capacity of the handoff queue between acknowledgment and processing
    pub queue_capacity: usize,
}

/// Flat view of the recognized environment keys.
#[derive(Debug, Deserialize)]
struct EnvSettings {
    line_channel_secret: SecretString,
    line_channel_access_token: SecretString,
    line_api_base_url: String,
    #[serde(default)]
    agentcore_runtime_arn: Option<String>,
    #[serde(default)]
    agent_runtime_url: Option<String>,
    #[serde(default)]
    agent_runtime_region: Option<String>,
    agent_runtime_qualifier: String,
    #[serde(default)]
    agent_runtime_bearer_token: Option<SecretString>,
    #[serde(default)]
    model_id: Option<String>,
    agent_runtime_sign_requests: bool,
    invocation_timeout_secs: u64,
    max_reply_chars: usize,
    overflow_policy: String,
    fallback_message: String,
    progress_updates: bool,
    require_mention_in_groups: bool,
    dispatch_max_retries: u32,
    queue_capacity: usize,
}

impl BridgeConfig {
    /// Load configuration from process environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    /// Load configuration from an explicit key/value map instead of the process environment
    pub fn load_from_map<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_environment(Environment::default().source(Some(source)))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        // Values stay strings until deserialized so secrets are never coerced to numbers
        let settings: EnvSettings = Config::builder()
            .add_source(env)
            .set_default("line_api_base_url", DEFAULT_LINE_API_BASE_URL)?
            .set_default("agent_runtime_qualifier", "DEFAULT")?
            .set_default("agent_runtime_sign_requests", true)?
            .set_default("invocation_timeout_secs", DEFAULT_INVOCATION_TIMEOUT_SECS as i64)?
            .set_default("max_reply_chars", LINE_MAX_TEXT_CHARS as i64)?
            .set_default("overflow_policy", "truncate")?
            .set_default("fallback_message", DEFAULT_FALLBACK_MESSAGE)?
            .set_default("progress_updates", false)?
            .set_default("require_mention_in_groups", true)?
            .set_default("dispatch_max_retries", 2)?
            .set_default("queue_capacity", 1024)?
            .build()?
            .try_deserialize()?;

        let config = Self::from_settings(settings)?;
        config.validate()?;
        Ok(config)
    }

    fn from_settings(s: EnvSettings) -> Result<Self, ConfigError> {
        let overflow: OverflowPolicy = s
            .overflow_policy
            .parse()
            .map_err(|e| ConfigError::Message(format!("{}", e)))?;

        let region = s
            .agent_runtime_region
            .filter(|r| !r.trim().is_empty())
            .or_else(|| s.agentcore_runtime_arn.as_deref().and_then(region_from_arn))
            .unwrap_or_else(|| DEFAULT_AGENT_REGION.to_string());

        Ok(Self {
            line: LineConfig {
                channel_secret: s.line_channel_secret,
                channel_access_token: s.line_channel_access_token,
                api_base_url: s.line_api_base_url,
                require_mention_in_groups: s.require_mention_in_groups,
            },
            agent: AgentRuntimeConfig {
                runtime_arn: non_empty(s.agentcore_runtime_arn),
                endpoint_url: non_empty(s.agent_runtime_url),
                region,
                qualifier: s.agent_runtime_qualifier,
                bearer_token: s.agent_runtime_bearer_token,
                model_id: non_empty(s.model_id),
                sign_requests: s.agent_runtime_sign_requests,
                invocation_timeout: Duration::from_secs(s.invocation_timeout_secs),
            },
            reply: ReplyConfig {
                policy: ReplyPolicy::new(s.max_reply_chars, overflow),
                fallback_message: s.fallback_message,
                progress_updates: s.progress_updates,
            },
            dispatch: DispatchConfig {
                max_retries: s.dispatch_max_retries,
            },
            queue_capacity: s.queue_capacity,
        })
    }

    /// Reject configurations the bridge cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line.channel_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Message(
                "LINE_CHANNEL_SECRET must not be empty".to_string(),
            ));
        }
        if self.line.channel_access_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Message(
                "LINE_CHANNEL_ACCESS_TOKEN must not be empty".to_string(),
            ));
        }
        if self.agent.runtime_arn.is_none() && self.agent.endpoint_url.is_none() {
            return Err(ConfigError::Message(
                "either AGENTCORE_RUNTIME_ARN or AGENT_RUNTIME_URL must be set".to_string(),
            ));
        }
        if self.agent.invocation_timeout.is_zero() {
            return Err(ConfigError::Message(
                "INVOCATION_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.reply.policy.max_chars == 0 || self.reply.policy.max_chars > LINE_MAX_TEXT_CHARS {
            return Err(ConfigError::Message(format!(
                "MAX_REPLY_CHARS must be between 1 and {}",
                LINE_MAX_TEXT_CHARS
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// LINE channel configuration
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub channel_secret: SecretString,
    pub channel_access_token: SecretString,
    pub api_base_url: String,
    pub require_mention_in_groups: bool,
}

/// Agent runtime configuration
#[derive(Debug, Clone)]
pub struct AgentRuntimeConfig {
    pub runtime_arn: Option<String>,
    /// Explicit invocation URL; takes precedence over the ARN-derived endpoint
    pub endpoint_url: Option<String>,
    pub region: String,
    pub qualifier: String,
    pub bearer_token: Option<SecretString>,
    /// Passed through to the agent unchanged
    pub model_id: Option<String>,
    /// Sign invocations with the hosting environment's AWS credentials when
    /// no bearer token is configured
    pub sign_requests: bool,
    pub invocation_timeout: Duration,
}

/// Reply shaping configuration
#[derive(Debug, Clone)]
pub struct ReplyConfig {
    pub policy: ReplyPolicy,
    pub fallback_message: String,
    pub progress_updates: bool,
}

/// Outbound dispatch configuration
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Retries per send path after the first attempt
    pub max_retries: u32,
}

/// Extract the region segment of an ARN (`arn:partition:service:region:account:resource`).
pub fn region_from_arn(arn: &str) -> Option<String> {
    let mut parts = arn.split(':');
    if parts.next() != Some("arn") {
        return None;
    }
    parts
        .nth(2)
        .filter(|region| !region.is_empty())
        .map(str::to_string)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
