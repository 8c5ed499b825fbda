//! Outbound reply delivery
//!
//! Replies go out through the reply API first. A rejected reply token moves
//! delivery to the push API addressed to the same chat. Throttling,
//! server errors and transport failures are retried a bounded number of times
//! on each route.

use crate::{
    delivery::{DeliveryAttempt, DeliveryRecord, DeliveryRoute, DeliveryStatus, RetryConfig},
    BridgeError, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use lineagent_core::{FinalReply, LineConfig, LINE_MAX_MESSAGES_PER_REQUEST};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Push requests carrying the same key are accepted at most once by LINE
pub const RETRY_KEY_HEADER: &str = "X-Line-Retry-Key";

/// Seconds the loading animation stays visible
pub const LOADING_SECONDS: u32 = 60;

/// Text pushed to group chats while the agent works
pub const THINKING_TEXT: &str = "Thinking...";

/// LINE Messaging API operations used by the bridge
#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Send messages with a reply token
    async fn reply(&self, reply_token: &str, messages: &[String]) -> Result<()>;

    /// Send messages to a user, group or room id
    async fn push(&self, to: &str, messages: &[String], retry_key: Uuid) -> Result<()>;

    /// Show the loading animation in a one-to-one chat
    async fn show_loading(&self, chat_id: &str, seconds: u32) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// reqwest-based LINE Messaging API client
pub struct LineMessagingClient {
    http: Client,
    base_url: String,
    access_token: SecretString,
}

impl std::fmt::Debug for LineMessagingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineMessagingClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl LineMessagingClient {
    /// Create a client for the given API base URL
    pub fn new(base_url: &str, access_token: SecretString) -> Result<Self> {
        let base = Url::parse(base_url)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("lineagent-bridge/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn from_config(config: &LineConfig) -> Result<Self> {
        Self::new(&config.api_base_url, config.channel_access_token.clone())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        retry_key: Option<Uuid>,
    ) -> Result<()> {
        let mut request = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(self.access_token.expose_secret())
            .json(&body);

        if let Some(key) = retry_key {
            request = request.header(RETRY_KEY_HEADER, key.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // The retry key was already accepted by an earlier attempt
        if status == StatusCode::CONFLICT && retry_key.is_some() {
            debug!(path, "Push already accepted for retry key");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|b| b.message)
            .unwrap_or(text);

        if status == StatusCode::BAD_REQUEST && message.to_lowercase().contains("reply token") {
            return Err(BridgeError::ReplyTokenExpired);
        }

        Err(BridgeError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn text_messages(messages: &[String]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|text| json!({"type": "text", "text": text}))
        .collect()
}

#[async_trait]
impl MessagingApi for LineMessagingClient {
    async fn reply(&self, reply_token: &str, messages: &[String]) -> Result<()> {
        let body = json!({
            "replyToken": reply_token,
            "messages": text_messages(messages),
        });
        self.post("/v2/bot/message/reply", body, None).await
    }

    async fn push(&self, to: &str, messages: &[String], retry_key: Uuid) -> Result<()> {
        let body = json!({
            "to": to,
            "messages": text_messages(messages),
        });
        self.post("/v2/bot/message/push", body, Some(retry_key)).await
    }

    async fn show_loading(&self, chat_id: &str, seconds: u32) -> Result<()> {
        let body = json!({
            "chatId": chat_id,
            "loadingSeconds": seconds,
        });
        self.post("/v2/bot/chat/loading/start", body, None).await
    }
}

enum RouteOutcome {
    Delivered,
    TokenRejected,
    /// Reply may or may not have been accepted; the token cannot be reused
    Unconfirmed(BridgeError),
    Failed(BridgeError),
}

/// Delivers final replies, falling back from reply token to push
pub struct ReplyDispatcher {
    api: Arc<dyn MessagingApi>,
    retry: RetryConfig,
}

impl ReplyDispatcher {
    pub fn new(api: Arc<dyn MessagingApi>, retry: RetryConfig) -> Self {
        Self { api, retry }
    }

    /// Deliver a reply.
    ///
    /// Uses the reply token when present and falls back to push on the
    /// same destination if the token is rejected or the reply outcome is
    /// unknown. Reply tokens are single-use, so only throttled replies are
    /// sent again on the reply route. Never panics and never
    /// retries past the configured bound; the outcome is in the record.
    #[instrument(skip(self, reply), fields(destination = %reply.destination))]
    pub async fn dispatch(&self, reply: &FinalReply) -> DeliveryRecord {
        let messages = prepare_messages(&reply.segments);
        if messages.is_empty() {
            warn!("Reply has no sendable text");
            return DeliveryRecord::skipped(&reply.destination, "empty reply");
        }

        let mut record = DeliveryRecord::new(&reply.destination);

        if let Some(ref token) = reply.reply_token {
            let outcome = self
                .run_route(&mut record, DeliveryRoute::Reply, || {
                    self.api.reply(token, &messages)
                })
                .await;

            match outcome {
                RouteOutcome::Delivered => {
                    record.complete(DeliveryStatus::Delivered, None);
                    info!(
                        delivery_id = %record.id,
                        attempts = record.attempt_count(),
                        "Reply delivered"
                    );
                    return record;
                }
                RouteOutcome::TokenRejected => {
                    info!(delivery_id = %record.id, "Reply token rejected, falling back to push");
                    record.fell_back = true;
                }
                RouteOutcome::Unconfirmed(e) => {
                    warn!(delivery_id = %record.id, error = %e, "Reply not confirmed, falling back to push");
                    record.fell_back = true;
                }
                RouteOutcome::Failed(e) => {
                    error!(delivery_id = %record.id, error = %e, "Reply delivery failed");
                    record.complete(DeliveryStatus::Failed, Some(e.to_string()));
                    return record;
                }
            }
        }

        // One key per logical push so retries are deduplicated by LINE
        let retry_key = Uuid::new_v4();
        let destination = reply.destination.as_str();
        let outcome = self
            .run_route(&mut record, DeliveryRoute::Push, || {
                self.api.push(destination, &messages, retry_key)
            })
            .await;

        match outcome {
            RouteOutcome::Delivered => {
                record.complete(DeliveryStatus::Delivered, None);
                info!(
                    delivery_id = %record.id,
                    attempts = record.attempt_count(),
                    fell_back = record.fell_back,
                    "Push delivered"
                );
            }
            RouteOutcome::TokenRejected => {
                // Push carries no token; treat like any other rejection
                record.complete(
                    DeliveryStatus::Failed,
                    Some(BridgeError::ReplyTokenExpired.to_string()),
                );
            }
            RouteOutcome::Failed(e) | RouteOutcome::Unconfirmed(e) => {
                let failure = BridgeError::DispatchFailure(e.to_string());
                error!(
                    delivery_id = %record.id,
                    attempts = record.attempt_count(),
                    error = %failure,
                    "Push delivery failed"
                );
                record.complete(DeliveryStatus::Failed, Some(failure.to_string()));
            }
        }

        record
    }

    async fn run_route<F, Fut>(
        &self,
        record: &mut DeliveryRecord,
        route: DeliveryRoute,
        mut send: F,
    ) -> RouteOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut retry = 0u32;
        loop {
            if retry > 0 {
                let delay = self.retry.calculate_delay(retry);
                debug!(
                    delivery_id = %record.id,
                    ?route,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting before retry"
                );
                tokio::time::sleep(delay).await;
            }

            let started_at = Utc::now();
            let result = send().await;
            let completed_at = Utc::now();
            let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
            let attempt_number = record.attempts.len() as u32;

            let (status, status_code, error_message, outcome) = match result {
                Ok(()) => (DeliveryStatus::Delivered, None, None, Some(RouteOutcome::Delivered)),
                Err(e) => {
                    let status_code = e.status_code();
                    let message = Some(e.to_string());
                    // A reply token is spent once LINE accepts it, so only a
                    // throttled reply is known to be safe to send again
                    let repeatable = match route {
                        DeliveryRoute::Reply => status_code == Some(429),
                        DeliveryRoute::Push => e.is_retryable(),
                    };
                    if matches!(e, BridgeError::ReplyTokenExpired) {
                        (DeliveryStatus::Failed, status_code, message, Some(RouteOutcome::TokenRejected))
                    } else if repeatable && retry < self.retry.max_retries {
                        warn!(
                            delivery_id = %record.id,
                            ?route,
                            attempt = attempt_number,
                            error = %e,
                            "Delivery attempt failed, will retry"
                        );
                        (DeliveryStatus::Retrying, status_code, message, None)
                    } else if route == DeliveryRoute::Reply && e.is_retryable() {
                        (DeliveryStatus::Failed, status_code, message, Some(RouteOutcome::Unconfirmed(e)))
                    } else {
                        (DeliveryStatus::Failed, status_code, message, Some(RouteOutcome::Failed(e)))
                    }
                }
            };

            record.attempts.push(DeliveryAttempt {
                attempt_number,
                route,
                status,
                status_code,
                error_message,
                started_at,
                completed_at,
                duration_ms,
            });

            match outcome {
                Some(outcome) => return outcome,
                None => retry += 1,
            }
        }
    }

    /// Push a short notice; failures are logged and swallowed
    pub async fn notify(&self, to: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.api.push(to, &[text.to_string()], Uuid::new_v4()).await {
            warn!(destination = %to, error = %e, "Progress notice failed");
        }
    }

    /// Start the loading animation; failures are logged and swallowed
    pub async fn show_loading(&self, chat_id: &str) {
        if let Err(e) = self.api.show_loading(chat_id, LOADING_SECONDS).await {
            warn!(chat_id = %chat_id, error = %e, "Loading animation failed");
        }
    }
}

/// Trim segments, drop empty ones and cap at the per-request message limit
fn prepare_messages(segments: &[String]) -> Vec<String> {
    segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(LINE_MAX_MESSAGES_PER_REQUEST)
        .map(str::to_string)
        .collect()
}

/// Status notice pushed when the agent starts using a tool
pub fn tool_status_text(tool_name: &str) -> String {
    match tool_name {
        "current_time" => "Checking the current time...".to_string(),
        "web_search" => "Searching the web...".to_string(),
        "search_documentation" => "Searching the AWS documentation...".to_string(),
        "read_documentation" => "Reading the AWS documentation...".to_string(),
        "recommend" => "Looking for related documentation...".to_string(),
        "rss" => "Fetching the AWS What's New feed...".to_string(),
        other => format!("Running {}...", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineagent_core::Completion;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Reply(String, Vec<String>),
        Push(String, Vec<String>, Uuid),
        Loading(String),
    }

    /// Scripted API: pops one result per call, succeeding once the script runs out
    #[derive(Default)]
    struct ScriptedApi {
        calls: Mutex<Vec<Call>>,
        reply_results: Mutex<Vec<Result<()>>>,
        push_results: Mutex<Vec<Result<()>>>,
    }

    impl ScriptedApi {
        fn with_replies(results: Vec<Result<()>>) -> Self {
            let api = Self::default();
            *api.reply_results.lock().unwrap() = results;
            api
        }

        fn with_pushes(self, results: Vec<Result<()>>) -> Self {
            *self.push_results.lock().unwrap() = results;
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn next(results: &Mutex<Vec<Result<()>>>) -> Result<()> {
            let mut results = results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        }
    }

    #[async_trait]
    impl MessagingApi for ScriptedApi {
        async fn reply(&self, reply_token: &str, messages: &[String]) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Reply(reply_token.to_string(), messages.to_vec()));
            Self::next(&self.reply_results)
        }

        async fn push(&self, to: &str, messages: &[String], retry_key: Uuid) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Push(to.to_string(), messages.to_vec(), retry_key));
            Self::next(&self.push_results)
        }

        async fn show_loading(&self, chat_id: &str, _seconds: u32) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Loading(chat_id.to_string()));
            Ok(())
        }
    }

    fn reply(token: Option<&str>, text: &str) -> FinalReply {
        FinalReply {
            reply_token: token.map(str::to_string),
            destination: "U123".to_string(),
            segments: vec![text.to_string()],
            truncated: false,
            completion: Completion::EndOfStream,
        }
    }

    fn unavailable() -> BridgeError {
        BridgeError::Api {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reply_token_used_first() {
        let api = Arc::new(ScriptedApi::default());
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(Some("rt"), "  hello  ")).await;

        assert!(record.is_success());
        assert!(!record.fell_back);
        assert_eq!(api.calls(), vec![Call::Reply("rt".to_string(), vec!["hello".to_string()])]);
    }

    #[tokio::test]
    async fn test_expired_token_falls_back_to_push() {
        let api = Arc::new(ScriptedApi::with_replies(vec![Err(BridgeError::ReplyTokenExpired)]));
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(Some("stale"), "hello")).await;

        assert!(record.is_success());
        assert!(record.fell_back);
        assert_eq!(record.final_route(), Some(DeliveryRoute::Push));

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[1], Call::Push(to, _, _) if to == "U123"));
    }

    #[tokio::test]
    async fn test_missing_token_pushes_directly() {
        let api = Arc::new(ScriptedApi::default());
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(None, "hello")).await;

        assert!(record.is_success());
        assert!(!record.fell_back);
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded_and_reuse_key() {
        let api = Arc::new(
            ScriptedApi::default().with_pushes(vec![
                Err(unavailable()),
                Err(unavailable()),
                Err(unavailable()),
                Err(unavailable()),
            ]),
        );
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(None, "hello")).await;

        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.attempt_count(), 3);
        assert!(record.error.as_deref().unwrap_or_default().contains("Dispatch failed"));

        let keys: Vec<Uuid> = api
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Push(_, _, key) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| *k == keys[0]));
    }

    #[tokio::test]
    async fn test_throttled_reply_retried_on_reply_route() {
        let api = Arc::new(ScriptedApi::with_replies(vec![Err(BridgeError::Api {
            status: 429,
            message: "rate limited".to_string(),
        })]));
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(Some("rt"), "hello")).await;

        assert!(record.is_success());
        assert!(!record.fell_back);
        assert_eq!(record.attempts[0].status, DeliveryStatus::Retrying);
        assert_eq!(record.attempts[1].status, DeliveryStatus::Delivered);
        assert!(api.calls().iter().all(|c| matches!(c, Call::Reply(..))));
    }

    #[tokio::test]
    async fn test_unconfirmed_reply_is_never_resent_with_same_token() {
        // The token may already be spent: a second reply would be rejected
        // and a push after that would deliver the answer twice.
        let api = Arc::new(ScriptedApi::with_replies(vec![
            Err(BridgeError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            }),
            Err(BridgeError::ReplyTokenExpired),
        ]));
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(Some("rt"), "hello")).await;

        assert!(record.is_success());
        assert!(record.fell_back);
        assert_eq!(record.attempt_count(), 2);
        assert_eq!(record.attempts[0].route, DeliveryRoute::Reply);
        assert_eq!(record.attempts[0].status, DeliveryStatus::Failed);
        assert_eq!(record.final_route(), Some(DeliveryRoute::Push));

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], Call::Reply(token, _) if token == "rt"));
        assert!(matches!(&calls[1], Call::Push(to, _, _) if to == "U123"));
    }

    #[tokio::test]
    async fn test_reply_transport_failure_moves_to_push_retries() {
        let api = Arc::new(
            ScriptedApi::with_replies(vec![Err(unavailable())])
                .with_pushes(vec![Err(unavailable())]),
        );
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(Some("rt"), "hello")).await;

        assert!(record.is_success());
        let routes: Vec<DeliveryRoute> = record.attempts.iter().map(|a| a.route).collect();
        assert_eq!(
            routes,
            vec![DeliveryRoute::Reply, DeliveryRoute::Push, DeliveryRoute::Push]
        );
    }

    #[tokio::test]
    async fn test_non_retryable_reply_failure_does_not_push() {
        let api = Arc::new(ScriptedApi::with_replies(vec![Err(BridgeError::Api {
            status: 400,
            message: "The property, 'messages[0].text', may not be empty".to_string(),
        })]));
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(Some("rt"), "hello")).await;

        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_is_skipped() {
        let api = Arc::new(ScriptedApi::default());
        let dispatcher = ReplyDispatcher::new(api.clone(), RetryConfig::immediate(2));

        let record = dispatcher.dispatch(&reply(Some("rt"), "   ")).await;

        assert_eq!(record.status, DeliveryStatus::Skipped);
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_tool_status_text() {
        assert_eq!(tool_status_text("web_search"), "Searching the web...");
        assert_eq!(tool_status_text("calculator"), "Running calculator...");
    }

    #[test]
    fn test_prepare_messages_caps_count() {
        let segments: Vec<String> = (0..7).map(|i| format!(" part {} ", i)).collect();
        let messages = prepare_messages(&segments);
        assert_eq!(messages.len(), LINE_MAX_MESSAGES_PER_REQUEST);
        assert_eq!(messages[0], "part 0");
    }

    #[tokio::test]
    async fn test_client_reply_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .and(header("authorization", "Bearer token-abc"))
            .and(body_json(json!({
                "replyToken": "rt-1",
                "messages": [{"type": "text", "text": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            LineMessagingClient::new(&server.uri(), SecretString::new("token-abc".to_string())).unwrap();
        client.reply("rt-1", &["hi".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_maps_invalid_reply_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"message": "Invalid reply token"})),
            )
            .mount(&server)
            .await;

        let client =
            LineMessagingClient::new(&server.uri(), SecretString::new("token".to_string())).unwrap();
        let err = client.reply("expired", &["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, BridgeError::ReplyTokenExpired));
    }

    #[tokio::test]
    async fn test_client_push_sends_retry_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/push"))
            .and(header_exists("x-line-retry-key"))
            .and(body_json(json!({
                "to": "Cgroup",
                "messages": [{"type": "text", "text": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sentMessages": []})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/bot/chat/loading/start"))
            .and(body_json(json!({"chatId": "U1", "loadingSeconds": 60})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            LineMessagingClient::new(&server.uri(), SecretString::new("token".to_string())).unwrap();
        client.push("Cgroup", &["hi".to_string()], Uuid::new_v4()).await.unwrap();
        client.show_loading("U1", LOADING_SECONDS).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_conflict_on_retry_key_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/push"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "The retry key is already accepted"
            })))
            .mount(&server)
            .await;

        let client =
            LineMessagingClient::new(&server.uri(), SecretString::new("token".to_string())).unwrap();
        assert!(client.push("U1", &["hi".to_string()], Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client =
            LineMessagingClient::new(&server.uri(), SecretString::new("token".to_string())).unwrap();
        let err = client.push("U1", &["hi".to_string()], Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert!(err.is_retryable());
    }
}
