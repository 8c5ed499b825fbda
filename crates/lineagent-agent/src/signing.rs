//! SigV4 signing for agent runtime invocations
//!
//! The hosted runtime authorizes callers by IAM identity. Credentials come
//! from the standard AWS provider chain of the hosting environment and are
//! resolved on every call, so rotated role credentials are picked up.

use crate::error::{AgentError, Result};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningParams, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use std::time::SystemTime;
use tracing::debug;
use url::Url;

/// Service name in the credential scope of runtime requests
pub const SIGNING_SERVICE: &str = "bedrock-agentcore";

/// Signs requests with credentials from the hosting environment
#[derive(Clone)]
pub struct RequestSigner {
    credentials: SharedCredentialsProvider,
    region: String,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(credentials: SharedCredentialsProvider, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    /// Use the default provider chain: environment variables, shared
    /// profile, then container or instance role.
    pub async fn from_environment(region: &str) -> Result<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let credentials = sdk_config.credentials_provider().ok_or_else(|| {
            AgentError::Config("no AWS credentials provider available".to_string())
        })?;

        debug!(region, "AWS credentials provider loaded");
        Ok(Self::new(credentials, region))
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Signature headers for a request with the given headers and body.
    ///
    /// Every header passed in is covered by the signature and must be sent
    /// unchanged.
    pub async fn sign(
        &self,
        method: &str,
        url: &Url,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<Vec<(String, String)>> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| AgentError::Signing(format!("could not resolve AWS credentials: {}", e)))?;
        let identity: Identity = credentials.into();

        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SIGNING_SERVICE)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| AgentError::Signing(e.to_string()))?
            .into();

        let request = SignableRequest::new(
            method,
            url.as_str(),
            headers.iter().copied(),
            SignableBody::Bytes(body),
        )
        .map_err(|e| AgentError::Signing(e.to_string()))?;

        let (instructions, _signature) = sign(request, &params)
            .map_err(|e| AgentError::Signing(e.to_string()))?
            .into_parts();

        Ok(instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}
