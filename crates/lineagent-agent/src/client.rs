//! Agent runtime client implementation

use crate::error::{AgentError, Result};
use crate::signing::RequestSigner;
use crate::streaming::{AgentStream, ChunkKind, RuntimeEvent};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use lineagent_core::{AgentRuntimeConfig, AgentSession};
use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Header carrying the runtime session id
pub const SESSION_HEADER: &str = "X-Amzn-Bedrock-AgentCore-Runtime-Session-Id";

/// Opens one streaming agent invocation per message
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Start an invocation; the returned stream ends with an end marker or an error
    async fn invoke(&self, session: &AgentSession, message: &str) -> Result<AgentStream>;
}

#[derive(Debug, Serialize)]
struct InvocationRequest<'a> {
    prompt: &'a str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<&'a str>,
}

/// HTTP client for the hosted agent runtime
#[derive(Clone)]
pub struct AgentRuntimeClient {
    http: Client,
    endpoint: Url,
    bearer_token: Option<SecretString>,
    signer: Option<RequestSigner>,
    model_id: Option<String>,
}

impl std::fmt::Debug for AgentRuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntimeClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("signer", &self.signer)
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// Builder for creating an AgentRuntimeClient
#[derive(Default)]
pub struct AgentRuntimeClientBuilder {
    runtime_arn: Option<String>,
    endpoint_url: Option<String>,
    region: Option<String>,
    qualifier: Option<String>,
    bearer_token: Option<SecretString>,
    signer: Option<RequestSigner>,
    model_id: Option<String>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl AgentRuntimeClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime ARN used to derive the invocation endpoint
    pub fn runtime_arn(mut self, arn: impl Into<String>) -> Self {
        self.runtime_arn = Some(arn.into());
        self
    }

    /// Explicit invocation URL, overriding the ARN-derived endpoint
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Bearer token sent instead of a SigV4 signature
    pub fn bearer_token(mut self, token: Option<SecretString>) -> Self {
        self.bearer_token = token;
        self
    }

    /// Sign requests with AWS credentials; ignored when a bearer token is set
    pub fn signer(mut self, signer: Option<RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn model_id(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client
    pub fn build(self) -> Result<AgentRuntimeClient> {
        let endpoint = match (self.endpoint_url, self.runtime_arn) {
            (Some(url), _) => Url::parse(&url)?,
            (None, Some(arn)) => runtime_endpoint(
                &arn,
                self.region.as_deref().unwrap_or("us-east-1"),
                self.qualifier.as_deref().unwrap_or("DEFAULT"),
            )?,
            (None, None) => {
                return Err(AgentError::Config(
                    "either a runtime ARN or an endpoint URL is required".to_string(),
                ))
            }
        };

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("lineagent-bridge/{}", env!("CARGO_PKG_VERSION")));

        // No overall request timeout: the stream may legitimately run for the whole
        // invocation budget, which the caller enforces.
        let http = Client::builder()
            .connect_timeout(self.connect_timeout.unwrap_or(Duration::from_secs(10)))
            .user_agent(user_agent)
            .build()
            .map_err(AgentError::Http)?;

        Ok(AgentRuntimeClient {
            http,
            endpoint,
            bearer_token: self.bearer_token,
            signer: self.signer,
            model_id: self.model_id,
        })
    }
}

/// Invocation endpoint for a runtime ARN
pub fn runtime_endpoint(arn: &str, region: &str, qualifier: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("https://bedrock-agentcore.{}.amazonaws.com/", region))?;
    url.path_segments_mut()
        .map_err(|_| AgentError::Config("endpoint URL cannot have a path".to_string()))?
        .pop_if_empty()
        .push("runtimes")
        .push(arn)
        .push("invocations");
    url.query_pairs_mut().append_pair("qualifier", qualifier);
    Ok(url)
}

impl AgentRuntimeClient {
    /// Create a new client builder
    pub fn builder() -> AgentRuntimeClientBuilder {
        AgentRuntimeClientBuilder::new()
    }

    /// Create a client from bridge configuration
    pub fn from_config(config: &AgentRuntimeConfig, signer: Option<RequestSigner>) -> Result<Self> {
        let mut builder = Self::builder()
            .region(config.region.clone())
            .qualifier(config.qualifier.clone())
            .bearer_token(config.bearer_token.clone())
            .signer(signer)
            .model_id(config.model_id.clone());
        if let Some(ref url) = config.endpoint_url {
            builder = builder.endpoint_url(url.clone());
        }
        if let Some(ref arn) = config.runtime_arn {
            builder = builder.runtime_arn(arn.clone());
        }
        builder.build()
    }

    /// Get the invocation endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn into_stream(response: Response) -> AgentStream {
        let is_event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_event_stream {
            // Non-streaming entrypoints answer with a single JSON or text body
            let body = stream::once(async move {
                let text = response.text().await.map_err(|e| AgentError::Stream(e.to_string()))?;
                Ok::<_, AgentError>(ChunkKind::Text(plain_body_text(&text)))
            });
            return AgentStream::sequenced(body.chain(stream::once(async { Ok(ChunkKind::End) })));
        }

        let kinds = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => RuntimeEvent::decode(&event.data).into_chunk_kind(),
                    Err(e) => Some(Err(AgentError::Stream(e.to_string()))),
                }
            });

        // A cleanly closed body is the runtime finishing without an explicit terminator
        AgentStream::sequenced(kinds.chain(stream::once(async { Ok(ChunkKind::End) })))
    }
}

fn plain_body_text(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(text)) => text,
        _ => body.to_string(),
    }
}

#[async_trait]
impl AgentInvoker for AgentRuntimeClient {
    #[instrument(skip(self, message), fields(session_id = %session.session_id))]
    async fn invoke(&self, session: &AgentSession, message: &str) -> Result<AgentStream> {
        let request = InvocationRequest {
            prompt: message,
            session_id: &session.session_id,
            model_id: self.model_id.as_deref(),
        };

        let body = serde_json::to_vec(&request)?;
        let session_header = SESSION_HEADER.to_ascii_lowercase();
        let headers = [
            ("content-type", "application/json"),
            ("accept", "text/event-stream"),
            (session_header.as_str(), session.session_id.as_str()),
        ];

        let mut req = self.http.post(self.endpoint.clone());
        for (name, value) in headers {
            req = req.header(name, value);
        }

        if let Some(ref token) = self.bearer_token {
            req = req.bearer_auth(token.expose_secret());
        } else if let Some(ref signer) = self.signer {
            for (name, value) in signer.sign("POST", &self.endpoint, &headers, &body).await? {
                req = req.header(name, value);
            }
        }

        let response = req.body(body).send().await.map_err(AgentError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status, "Agent runtime rejected invocation");
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Agent runtime stream opened");
        Ok(Self::into_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::StreamChunk;
    use aws_credential_types::{provider::SharedCredentialsProvider, Credentials};
    use wiremock::matchers::{
        body_partial_json, header as header_eq, header_exists, header_regex, method, path,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> AgentSession {
        AgentSession {
            session_id: "line-U4af4980629a0b1c2d3e4f5a6b7c8d9e0".to_string(),
            conversation_id: Some("U4af4980629a0b1c2d3e4f5a6b7c8d9e0".to_string()),
            minted: false,
        }
    }

    fn sse(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("data: {}\n\n", l)).collect()
    }

    async fn collect(stream: AgentStream) -> Vec<Result<StreamChunk>> {
        stream.collect().await
    }

    #[test]
    fn test_runtime_endpoint_encodes_arn() {
        let arn = "arn:aws:bedrock-agentcore:us-east-1:123456789012:runtime/line_agent-abc";
        let url = runtime_endpoint(arn, "us-east-1", "DEFAULT").unwrap();

        assert_eq!(url.host_str(), Some("bedrock-agentcore.us-east-1.amazonaws.com"));
        assert!(url.path().starts_with("/runtimes/arn:aws:bedrock-agentcore"));
        assert!(url.path().contains("runtime%2Fline_agent-abc"));
        assert!(url.path().ends_with("/invocations"));
        assert_eq!(url.query(), Some("qualifier=DEFAULT"));
    }

    #[test]
    fn test_builder_requires_address() {
        assert!(AgentRuntimeClient::builder().build().is_err());

        let client = AgentRuntimeClient::builder()
            .endpoint_url("http://localhost:8080/invocations")
            .build()
            .unwrap();
        assert_eq!(client.endpoint().as_str(), "http://localhost:8080/invocations");
    }

    #[tokio::test]
    async fn test_invoke_streams_chunks_in_order() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"init_event_loop": true}"#,
            r#"{"event": {"contentBlockDelta": {"delta": {"text": "Hello"}}}}"#,
            r#""{'data': 'Hello', 'agent': <Agent>}""#,
            r#"{"event": {"contentBlockDelta": {"delta": {"text": ", world"}}}}"#,
            r#"{"event": {"contentBlockStop": {"contentBlockIndex": 0}}}"#,
            "[DONE]",
        ]);

        Mock::given(method("POST"))
            .and(path("/invocations"))
            .and(header_eq(SESSION_HEADER, session().session_id.as_str()))
            .and(body_partial_json(serde_json::json!({
                "prompt": "hi",
                "session_id": session().session_id,
                "model_id": "test-model",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = AgentRuntimeClient::builder()
            .endpoint_url(format!("{}/invocations", server.uri()))
            .model_id(Some("test-model".to_string()))
            .build()
            .unwrap();

        let chunks = collect(client.invoke(&session(), "hi").await.unwrap()).await;
        let chunks: Vec<StreamChunk> = chunks.into_iter().map(|c| c.unwrap()).collect();

        assert_eq!(
            chunks,
            vec![
                StreamChunk::text(0, "Hello"),
                StreamChunk::text(1, ", world"),
                StreamChunk::new(2, ChunkKind::BlockStop),
                StreamChunk::end(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke_signs_with_aws_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_regex(
                "authorization",
                r"^AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/\d{8}/us-east-1/bedrock-agentcore/aws4_request, SignedHeaders=[a-z0-9;-]*x-amzn-bedrock-agentcore-runtime-session-id[a-z0-9;-]*, Signature=[0-9a-f]{64}$",
            ))
            .and(header_exists("x-amz-date"))
            .and(header_eq("x-amz-security-token", "role-session"))
            .and(header_eq(SESSION_HEADER, session().session_id.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse(&["[DONE]"]), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credentials = Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            Some("role-session".to_string()),
            None,
            "test",
        );
        let client = AgentRuntimeClient::builder()
            .endpoint_url(format!("{}/invocations", server.uri()))
            .signer(Some(RequestSigner::new(
                SharedCredentialsProvider::new(credentials),
                "us-east-1",
            )))
            .build()
            .unwrap();

        let chunks = collect(client.invoke(&session(), "hi").await.unwrap()).await;
        assert!(chunks[0].as_ref().unwrap().is_end());
    }

    #[tokio::test]
    async fn test_bearer_token_replaces_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_eq("authorization", "Bearer runtime-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse(&["[DONE]"]), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credentials = Credentials::new("AKIDEXAMPLE", "secret", None, None, "test");
        let client = AgentRuntimeClient::builder()
            .endpoint_url(server.uri())
            .bearer_token(Some(SecretString::new("runtime-token".to_string())))
            .signer(Some(RequestSigner::new(
                SharedCredentialsProvider::new(credentials),
                "us-east-1",
            )))
            .build()
            .unwrap();

        client.invoke(&session(), "hi").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("x-amz-date").is_none());
    }

    #[tokio::test]
    async fn test_invoke_synthesizes_end_on_clean_close() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse(&[
                        r#"{"event": {"contentBlockDelta": {"delta": {"text": "done"}}}}"#,
                    ]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = AgentRuntimeClient::builder()
            .endpoint_url(server.uri())
            .build()
            .unwrap();

        let chunks = collect(client.invoke(&session(), "hi").await.unwrap()).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].as_ref().unwrap().is_end());
    }

    #[tokio::test]
    async fn test_invoke_surfaces_runtime_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse(&[
                        r#"{"event": {"contentBlockDelta": {"delta": {"text": "par"}}}}"#,
                        r#"{"error": "model throttled"}"#,
                    ]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = AgentRuntimeClient::builder()
            .endpoint_url(server.uri())
            .build()
            .unwrap();

        let chunks = collect(client.invoke(&session(), "hi").await.unwrap()).await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1], Err(AgentError::Runtime(ref m)) if m == "model throttled"));
    }

    #[tokio::test]
    async fn test_invoke_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = AgentRuntimeClient::builder()
            .endpoint_url(server.uri())
            .build()
            .unwrap();

        let err = client.invoke(&session(), "hi").await.err().unwrap();
        assert_eq!(err.status_code(), Some(503));
    }

    #[tokio::test]
    async fn test_invoke_accepts_plain_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#""plain answer""#),
            )
            .mount(&server)
            .await;

        let client = AgentRuntimeClient::builder()
            .endpoint_url(server.uri())
            .build()
            .unwrap();

        let chunks = collect(client.invoke(&session(), "hi").await.unwrap()).await;
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::text(0, "plain answer"));
        assert!(chunks[1].as_ref().unwrap().is_end());
    }
}
