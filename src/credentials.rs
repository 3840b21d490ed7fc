//! Bearer-token acquisition for the cognitive-services audience.
//!
//! The default chain mirrors the sources a hosted Azure environment
//! resolves ambiently: a service principal from the environment, the
//! instance metadata service, and finally the `az` CLI login.

use std::env;
use std::process::Command;
use std::time::Duration;

use crate::Error;

pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_API_VERSION: &str = "2018-02-01";

/// A bearer token, held only long enough to put in a request header.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
}

pub trait TokenCredential {
    /// Obtains a bearer token for the given scope, e.g.
    /// `https://cognitiveservices.azure.com/.default`.
    fn token(&self, scope: &str) -> Result<AccessToken, Error>;
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn parse_token_response(
    response: Result<ureq::Response, ureq::Error>,
) -> Result<AccessToken, Error> {
    let body = match response {
        Ok(response) => response
            .into_string()
            .map_err(|e| Error::CredentialError(e.to_string()))?,
        Err(ureq::Error::Status(status, response)) => {
            let mut text = format!("token endpoint returned {}", status);
            if let Ok(body) = response.into_string() {
                if !body.is_empty() {
                    text.push_str(": ");
                    text.push_str(&body);
                }
            }
            return Err(Error::CredentialError(text));
        }
        Err(e) => return Err(Error::CredentialError(e.to_string())),
    };

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| Error::CredentialError(format!("malformed token response: {}", e)))?;
    Ok(AccessToken {
        token: parsed.access_token,
    })
}

/// The AAD v2 endpoint takes scopes, IMDS still takes the bare resource URI.
fn resource_for_scope(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

/// A service principal authenticating with a client secret.
pub struct ClientSecretCredential {
    agent: ureq::Agent,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    pub fn new(tenant_id: String, client_id: String, client_secret: String) -> Self {
        Self::with_authority(
            DEFAULT_AUTHORITY.to_string(),
            tenant_id,
            client_id,
            client_secret,
        )
    }

    /// Like `new`, but against an explicit authority host.
    pub fn with_authority(
        authority: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            agent: ureq::Agent::new(),
            authority,
            tenant_id,
            client_id,
            client_secret,
        }
    }

    /// Reads `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`;
    /// returns `None` unless all three are present and non-empty.
    pub fn from_environment() -> Option<ClientSecretCredential> {
        let tenant_id = env::var(AZURE_TENANT_ID).unwrap_or_default();
        let client_id = env::var(AZURE_CLIENT_ID).unwrap_or_default();
        let client_secret = env::var(AZURE_CLIENT_SECRET).unwrap_or_default();

        if tenant_id.is_empty() || client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self::new(tenant_id, client_id, client_secret))
    }
}

impl TokenCredential for ClientSecretCredential {
    fn token(&self, scope: &str) -> Result<AccessToken, Error> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id);
        let response = self.agent.post(&url).send_form(&[
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", scope),
        ]);

        parse_token_response(response)
    }
}

/// The instance metadata service of an Azure-hosted VM or container.
pub struct ManagedIdentityCredential {
    agent: ureq::Agent,
    endpoint: String,
}

impl ManagedIdentityCredential {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_IMDS_ENDPOINT.to_string())
    }

    /// Like `new`, but against an explicit metadata endpoint.
    pub fn with_endpoint(endpoint: String) -> Self {
        // IMDS is a link-local address only reachable on Azure; keep the
        // probe short so the chain moves on quickly elsewhere.
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(2))
            .build();

        Self { agent, endpoint }
    }
}

impl Default for ManagedIdentityCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCredential for ManagedIdentityCredential {
    fn token(&self, scope: &str) -> Result<AccessToken, Error> {
        let url = format!("{}/metadata/identity/oauth2/token", self.endpoint);
        let response = self
            .agent
            .get(&url)
            .query("api-version", IMDS_API_VERSION)
            .query("resource", resource_for_scope(scope))
            .set("Metadata", "true")
            .call();

        parse_token_response(response)
    }
}

/// The token cached by a local `az login`.
pub struct AzureCliCredential;

impl TokenCredential for AzureCliCredential {
    fn token(&self, scope: &str) -> Result<AccessToken, Error> {
        let output = Command::new("az")
            .args(["account", "get-access-token", "--scope", scope])
            .args(["--output", "json"])
            .output()
            .map_err(|e| Error::CredentialError(format!("failed to run az: {}", e)))?;

        if !output.status.success() {
            return Err(Error::CredentialError(format!(
                "az account get-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CliToken {
            access_token: String,
        }

        let parsed: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::CredentialError(format!("malformed az token output: {}", e)))?;
        Ok(AccessToken {
            token: parsed.access_token,
        })
    }
}

/// A literal token supplied by the caller.
pub struct StaticTokenCredential(String);

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenCredential for StaticTokenCredential {
    fn token(&self, _scope: &str) -> Result<AccessToken, Error> {
        Ok(AccessToken {
            token: self.0.clone(),
        })
    }
}

/// Tries each configured source in order and returns the first token.
///
/// A failing source only removes itself from consideration; the chain
/// fails once every source has failed, with an error naming each one.
pub struct DefaultCredentialChain {
    sources: Vec<(&'static str, Box<dyn TokenCredential>)>,
}

impl DefaultCredentialChain {
    pub fn new() -> Self {
        let mut sources: Vec<(&'static str, Box<dyn TokenCredential>)> = Vec::new();

        if let Some(credential) = ClientSecretCredential::from_environment() {
            sources.push(("environment", Box::new(credential)));
        }
        sources.push(("managed identity", Box::new(ManagedIdentityCredential::new())));
        sources.push(("azure cli", Box::new(AzureCliCredential)));

        Self { sources }
    }

    pub fn from_sources(sources: Vec<(&'static str, Box<dyn TokenCredential>)>) -> Self {
        Self { sources }
    }
}

impl Default for DefaultCredentialChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCredential for DefaultCredentialChain {
    fn token(&self, scope: &str) -> Result<AccessToken, Error> {
        let mut failures = Vec::new();

        for (name, source) in &self.sources {
            match source.token(scope) {
                Ok(token) => return Ok(token),
                Err(e) => failures.push(format!("{}: {}", name, e)),
            }
        }

        if failures.is_empty() {
            return Err(Error::CredentialError(
                "no credential sources configured".into(),
            ));
        }

        Err(Error::CredentialError(format!(
            "no credential source produced a token ({})",
            failures.join("; ")
        )))
    }
}
