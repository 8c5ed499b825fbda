//! Application state and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use lineagent_agent::{AgentRuntimeClient, ConversationSessions, RequestSigner};
use lineagent_core::BridgeConfig;
use lineagent_webhook::{
    Bridge, BridgeProcessor, BridgeQueue, BridgeSettings, ExtractOptions, LineMessagingClient,
    ReplyDispatcher, RetryConfig, SignatureVerifier, WebhookState,
};

use crate::cli::Args;
use crate::server::Server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub webhook: Arc<WebhookState>,
}

impl AppState {
    /// Wire clients, the bridge and the processing queue from configuration
    pub async fn new(config: BridgeConfig) -> Result<(Self, BridgeProcessor)> {
        info!("Initializing application components");

        let signer = if config.agent.bearer_token.is_none() && config.agent.sign_requests {
            let signer = RequestSigner::from_environment(&config.agent.region)
                .await
                .context("Failed to load AWS credentials provider")?;
            Some(signer)
        } else {
            None
        };
        let auth = match (&config.agent.bearer_token, &signer) {
            (Some(_), _) => "bearer",
            (None, Some(_)) => "sigv4",
            (None, None) => "none",
        };

        let invoker = AgentRuntimeClient::from_config(&config.agent, signer)
            .context("Failed to create agent runtime client")?;
        info!(endpoint = %invoker.endpoint(), auth, "Agent runtime client ready");

        let messaging = LineMessagingClient::from_config(&config.line)
            .context("Failed to create LINE messaging client")?;
        let dispatcher = ReplyDispatcher::new(
            Arc::new(messaging),
            RetryConfig::default().with_max_retries(config.dispatch.max_retries),
        );

        let bridge = Arc::new(Bridge::new(
            Arc::new(invoker),
            Arc::new(ConversationSessions::new()),
            Arc::new(dispatcher),
            BridgeSettings::from_config(&config),
        ));

        let (queue, processor) = BridgeQueue::new(bridge, config.queue_capacity);

        let webhook = Arc::new(WebhookState::new(
            SignatureVerifier::new(config.line.channel_secret.clone()),
            queue,
            ExtractOptions {
                require_mention_in_groups: config.line.require_mention_in_groups,
            },
        ));

        Ok((
            Self {
                config: Arc::new(config),
                webhook,
            },
            processor,
        ))
    }
}

/// Main application
pub struct App {
    args: Args,
    state: AppState,
    processor: BridgeProcessor,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        let config = BridgeConfig::load().context("Failed to load configuration")?;
        Self::with_config(args, config).await
    }

    pub async fn with_config(args: Args, config: BridgeConfig) -> Result<Self> {
        let (state, processor) = AppState::new(config).await?;
        Ok(Self {
            args,
            state,
            processor,
        })
    }

    /// Run the application
    pub async fn run(self) -> Result<()> {
        info!(
            timeout_secs = self.state.config.agent.invocation_timeout.as_secs(),
            overflow = ?self.state.config.reply.policy.overflow,
            "Starting server"
        );

        tokio::spawn(self.processor.run());

        let server = Server::new(self.args, self.state);
        server.run().await
    }
}
