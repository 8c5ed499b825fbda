//! Message orchestration
//!
//! The acknowledgment path hands verified messages to a [`BridgeQueue`] and
//! returns. A [`BridgeProcessor`] drains the queue and runs each message in
//! its own task: session, invocation, aggregation, dispatch.

use crate::{
    delivery::DeliveryRecord,
    outbound::{tool_status_text, ReplyDispatcher, THINKING_TEXT},
    BridgeError, Result,
};
use futures::StreamExt;
use lineagent_agent::{
    AgentError, AgentInvoker, AggregateStep, ChunkKind, ResponseAggregator, SessionResolver,
};
use lineagent_core::{AgentSession, BridgeConfig, ChatMessage, Completion, FinalReply, ReplyPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle of an inbound delivery and of each message it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Received,
    Verified,
    Rejected,
    Acknowledged,
    Invoking,
    Aggregating,
    Dispatched,
    Failed,
}

impl BridgeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Dispatched | Self::Failed)
    }
}

/// Per-message processing settings
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub policy: ReplyPolicy,
    pub invocation_timeout: Duration,
    pub fallback_message: String,
    /// Push loading, thinking and tool-status notices
    pub progress_updates: bool,
}

impl BridgeSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            policy: config.reply.policy,
            invocation_timeout: config.agent.invocation_timeout,
            fallback_message: config.reply.fallback_message.clone(),
            progress_updates: config.reply.progress_updates,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            policy: ReplyPolicy::default(),
            invocation_timeout: Duration::from_secs(lineagent_core::DEFAULT_INVOCATION_TIMEOUT_SECS),
            fallback_message: lineagent_core::DEFAULT_FALLBACK_MESSAGE.to_string(),
            progress_updates: false,
        }
    }
}

/// How one message ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub event_id: Option<String>,
    pub destination: String,
    pub session_id: String,
    /// `Dispatched` or `Failed`
    pub state: BridgeState,
    /// Why the reply was finalized, when one was built
    pub completion: Option<Completion>,
    pub delivery: DeliveryRecord,
    /// Invocation or dispatch error, if any
    pub error: Option<String>,
}

/// Drives one message from invocation to dispatch
pub struct Bridge {
    invoker: Arc<dyn AgentInvoker>,
    sessions: Arc<dyn SessionResolver>,
    dispatcher: Arc<ReplyDispatcher>,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        sessions: Arc<dyn SessionResolver>,
        dispatcher: Arc<ReplyDispatcher>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            invoker,
            sessions,
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Process one message to a terminal state.
    ///
    /// Every failure ends in `Failed`; a fallback reply is still attempted
    /// when the message carries a reply token.
    pub async fn process(&self, message: ChatMessage) -> MessageOutcome {
        let session = self.sessions.resolve(Some(message.conversation_id())).await;
        debug!(
            event_id = %message.log_id(),
            session_id = %session.session_id,
            minted = session.minted,
            "Resolved agent session"
        );

        if self.settings.progress_updates {
            self.announce(&message).await;
        }

        self.transition(&message, BridgeState::Invoking);
        let mut aggregator = ResponseAggregator::new(self.settings.policy);
        let timeout = self.settings.invocation_timeout;

        let result = match tokio::time::timeout(timeout, self.drive(&message, &session, &mut aggregator)).await {
            Ok(result) => result.map_err(BridgeError::from),
            // Dropping the drive future closes the runtime stream
            Err(_) => Err(BridgeError::InvocationTimeout(timeout)),
        };

        match result {
            Ok(completion) => {
                self.transition(&message, BridgeState::Aggregating);
                let mut reply = aggregator.finish(
                    &message.destination,
                    message.reply_token.as_deref(),
                    completion,
                );
                if reply.is_empty() {
                    warn!(event_id = %message.log_id(), "Agent returned no text, sending fallback");
                    reply = FinalReply::fallback(&message, &self.settings.fallback_message);
                }
                if reply.truncated {
                    info!(event_id = %message.log_id(), completion = ?reply.completion, "Reply truncated to size limit");
                }

                let delivery = self.dispatcher.dispatch(&reply).await;
                let state = if delivery.is_success() {
                    BridgeState::Dispatched
                } else {
                    BridgeState::Failed
                };
                self.transition(&message, state);

                MessageOutcome {
                    event_id: message.event_id.clone(),
                    destination: message.destination.clone(),
                    session_id: session.session_id,
                    state,
                    completion: Some(reply.completion),
                    error: delivery.error.clone(),
                    delivery,
                }
            }
            Err(e) => self.fail(&message, session, &aggregator, e).await,
        }
    }

    async fn drive(
        &self,
        message: &ChatMessage,
        session: &AgentSession,
        aggregator: &mut ResponseAggregator,
    ) -> lineagent_agent::Result<Completion> {
        let mut stream = self.invoker.invoke(session, &message.text).await?;
        let mut announced = false;

        while let Some(item) = stream.next().await {
            let chunk = item?;

            if let ChunkKind::ToolUse { ref name } = chunk.kind {
                debug!(event_id = %message.log_id(), tool = %name, "Agent started tool");
                if self.settings.progress_updates {
                    self.dispatcher
                        .notify(&message.destination, &tool_status_text(name))
                        .await;
                }
            }

            match aggregator.push(chunk)? {
                AggregateStep::Continue => {
                    if !announced && !aggregator.is_empty() {
                        announced = true;
                        self.transition(message, BridgeState::Aggregating);
                    }
                }
                AggregateStep::Complete => return Ok(Completion::EndOfStream),
                AggregateStep::LimitReached => return Ok(Completion::LengthLimit),
            }
        }

        Err(AgentError::Incomplete)
    }

    async fn fail(
        &self,
        message: &ChatMessage,
        session: AgentSession,
        aggregator: &ResponseAggregator,
        err: BridgeError,
    ) -> MessageOutcome {
        error!(
            event_id = %message.log_id(),
            session_id = %session.session_id,
            error = %err,
            partial_chars = aggregator.text().chars().count(),
            "Agent invocation failed"
        );

        let (delivery, completion) = match message.reply_token {
            Some(_) => {
                let reply = if aggregator.is_empty() {
                    FinalReply::fallback(message, &self.settings.fallback_message)
                } else {
                    aggregator.finish(
                        &message.destination,
                        message.reply_token.as_deref(),
                        Completion::Interrupted,
                    )
                };
                (self.dispatcher.dispatch(&reply).await, Some(reply.completion))
            }
            None => {
                warn!(event_id = %message.log_id(), "No reply token, skipping fallback reply");
                (
                    DeliveryRecord::skipped(&message.destination, "no reply token"),
                    None,
                )
            }
        };

        self.transition(message, BridgeState::Failed);
        MessageOutcome {
            event_id: message.event_id.clone(),
            destination: message.destination.clone(),
            session_id: session.session_id,
            state: BridgeState::Failed,
            completion,
            delivery,
            error: Some(err.to_string()),
        }
    }

    async fn announce(&self, message: &ChatMessage) {
        if message.source.is_multi_party() {
            self.dispatcher.notify(&message.destination, THINKING_TEXT).await;
        } else {
            let chat_id = message.user_id.as_deref().unwrap_or(&message.destination);
            self.dispatcher.show_loading(chat_id).await;
        }
    }

    fn transition(&self, message: &ChatMessage, state: BridgeState) {
        debug!(
            event_id = %message.log_id(),
            state = ?state,
            terminal = state.is_terminal(),
            "Message state changed"
        );
    }
}

/// Handoff from the acknowledgment path to downstream processing
#[derive(Clone)]
pub struct BridgeQueue {
    sender: mpsc::Sender<ChatMessage>,
}

impl BridgeQueue {
    /// Create a bounded queue and its processor
    pub fn new(bridge: Arc<Bridge>, capacity: usize) -> (Self, BridgeProcessor) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let processor = BridgeProcessor {
            bridge,
            receiver,
            outcomes: None,
        };

        (Self { sender }, processor)
    }

    /// Enqueue a message without waiting for capacity
    pub fn submit(&self, message: ChatMessage) -> Result<()> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BridgeError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => BridgeError::QueueClosed,
        })
    }
}

/// Runs queued messages, one task each
pub struct BridgeProcessor {
    bridge: Arc<Bridge>,
    receiver: mpsc::Receiver<ChatMessage>,
    outcomes: Option<mpsc::UnboundedSender<MessageOutcome>>,
}

impl BridgeProcessor {
    /// Publish each message outcome on `sender`
    pub fn with_outcomes(mut self, sender: mpsc::UnboundedSender<MessageOutcome>) -> Self {
        self.outcomes = Some(sender);
        self
    }

    /// Run the processor until every queue handle is dropped
    pub async fn run(mut self) {
        info!("Starting bridge processor");

        while let Some(message) = self.receiver.recv().await {
            let bridge = self.bridge.clone();
            let outcomes = self.outcomes.clone();

            // A failing or panicking message never reaches its siblings
            tokio::spawn(async move {
                let outcome = bridge.process(message).await;
                info!(
                    event_id = outcome.event_id.as_deref().unwrap_or("-"),
                    state = ?outcome.state,
                    attempts = outcome.delivery.attempt_count(),
                    "Message processed"
                );
                if let Some(tx) = outcomes {
                    let _ = tx.send(outcome);
                }
            });
        }

        info!("Bridge processor stopped");
    }
}
