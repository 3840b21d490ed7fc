use std::env;

use serde::ser::SerializeSeq;

pub mod credentials;

use credentials::TokenCredential;

pub const AZURE_OPENAI_SERVICE: &str = "AZURE_OPENAI_SERVICE";
pub const AZURE_OPENAI_EMBEDDING_DEPLOYMENT: &str = "AZURE_OPENAI_EMBEDDING_DEPLOYMENT";

pub const API_VERSION: &str = "2023-07-01-preview";
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

pub const DEFAULT_EMBEDDING_INPUT: &str = "dog";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("The configuration contains errors: {0}")]
    BadConfigurationError(String),

    #[error("Failed to acquire a token: {0}")]
    CredentialError(String),

    #[error("Failed to serialize request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Failed to deserialize response: {0}")]
    DeserializationError(serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error: {0}")]
    ApiError(String),
}

/// Builds the resource endpoint for an Azure OpenAI service name.
///
/// The service name is interpolated as-is; an empty name yields
/// `https://.openai.azure.com`, which fails at the transport layer.
pub fn endpoint_for_service(service: &str) -> String {
    format!("https://{}.openai.azure.com", service)
}

#[derive(Debug)]
pub enum Input {
    String(String),
    Array(Vec<String>),
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<String>> for Input {
    fn from(values: Vec<String>) -> Self {
        Self::Array(values)
    }
}

impl From<&[String]> for Input {
    fn from(values: &[String]) -> Self {
        Self::Array(values.to_vec())
    }
}

impl serde::Serialize for Input {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Input::String(string) => serializer.serialize_str(string),
            Input::Array(array) => {
                let mut seq = serializer.serialize_seq(Some(array.len()))?;
                for s in array {
                    seq.serialize_element(s)?;
                }
                seq.end()
            }
        }
    }
}

// NOTE: Options that aren't set are left out of the request body entirely.
// The Azure endpoint rejects unknown keys on some API versions, even when
// they're "null".

/// Embeddings request structure.
///
/// The deployment is not part of the request; it comes from the `Client`,
/// which routes to the deployment-scoped endpoint and echoes it as the
/// body's `model` field.
///
/// You can easily construct the input using .into():
///
/// ```rust
/// let embeddings = mini_azure_openai::Embeddings {
///     input: "Hello".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, serde::Serialize)]
pub struct Embeddings {
    pub input: Input,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for Embeddings {
    fn default() -> Self {
        Self {
            input: Input::String("".into()),
            dimensions: None,
            user: None,
        }
    }
}

#[derive(serde::Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a Embeddings,
}

#[derive(Debug, serde::Deserialize)]
pub struct EmbeddingsResponse {
    pub data: Vec<Embedding>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>, // Not all API versions return this
}

impl EmbeddingsResponse {
    /// Returns the first embedding of the response.
    ///
    /// A well-formed response carries one record per input; an empty `data`
    /// array is a malformed response and surfaces as an `ApiError`.
    pub fn first_embedding(&self) -> Result<&Embedding, Error> {
        self.data
            .first()
            .ok_or_else(|| Error::ApiError("response contained no embeddings".into()))
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct Embedding {
    #[serde(default)]
    pub index: u64,
    pub embedding: Vec<f64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

pub struct Client {
    agent: ureq::Agent,
    endpoint: String,
    deployment: String,
    credential: Box<dyn TokenCredential>,
}

impl Client {
    /// Creates a new `Client` instance from the process environment.
    ///
    /// The endpoint is built from the `AZURE_OPENAI_SERVICE` environment
    /// variable as `https://{service}.openai.azure.com`, and the deployment
    /// is read from `AZURE_OPENAI_EMBEDDING_DEPLOYMENT`. Neither value is
    /// validated: a missing variable produces a malformed endpoint and the
    /// request fails when it is sent.
    ///
    /// # Arguments
    ///
    /// * `credential`: The credential used to obtain a bearer token for each
    ///   request, usually a [`credentials::DefaultCredentialChain`].
    ///
    /// # Returns
    ///
    /// A `Result` containing the new `Client` instance, or an `Error` if the
    /// configuration is invalid.
    pub fn new(credential: Box<dyn TokenCredential>) -> Result<Client, Error> {
        let service = env::var(AZURE_OPENAI_SERVICE).unwrap_or_default();
        let deployment = env::var(AZURE_OPENAI_EMBEDDING_DEPLOYMENT).unwrap_or_default();

        Self::new_without_environment(endpoint_for_service(&service), deployment, credential)
    }

    /// Creates a new `Client` instance without checking environment variables.
    ///
    /// # Arguments
    ///
    /// * `endpoint`: The resource endpoint, e.g. `https://myservice.openai.azure.com`.
    /// * `deployment`: The embedding model deployment name.
    /// * `credential`: The credential used to obtain a bearer token.
    pub fn new_without_environment(
        endpoint: String,
        deployment: String,
        credential: Box<dyn TokenCredential>,
    ) -> Result<Client, Error> {
        Ok(Self {
            agent: ureq::Agent::new(),
            endpoint,
            deployment,
            credential,
        })
    }

    fn do_request(&self, url: String, token: &str, body: String) -> Result<String, Error> {
        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", token))
            .send_string(&body);

        match response {
            Ok(response) => response
                .into_string()
                .map_err(|e| Error::NetworkError(e.to_string())),
            Err(ureq::Error::Status(status, response)) => {
                let mut text = format!("{} {}", status, response.status_text());
                if let Ok(body) = response.into_string() {
                    if !body.is_empty() {
                        text.push_str(": ");
                        text.push_str(&body);
                    }
                }
                Err(Error::ApiError(text))
            }
            Err(e) => Err(Error::NetworkError(e.to_string())),
        }
    }

    /// Sends a request to the Azure OpenAI API to generate embeddings of text.
    ///
    /// A bearer token scoped to the cognitive-services audience is obtained
    /// from the client's credential and a single POST is issued to the
    /// deployment's embeddings endpoint. There are no retries.
    ///
    /// # Arguments
    ///
    /// * `request`: The `Embeddings` struct containing the request parameters.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `EmbeddingsResponse` struct, or an `Error`
    /// if the request fails.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mini_azure_openai::credentials::DefaultCredentialChain;
    /// use mini_azure_openai::{Client, Embeddings};
    ///
    /// let client = Client::new(Box::new(DefaultCredentialChain::new())).unwrap();
    ///
    /// let request = Embeddings { input: "Hello".into(), ..Default::default() };
    ///
    /// let response = client.embeddings(&request).unwrap();
    /// println!("{:?}", response.data[0].embedding);
    /// ```
    pub fn embeddings(&self, request: &Embeddings) -> Result<EmbeddingsResponse, Error> {
        let token = self.credential.token(COGNITIVE_SERVICES_SCOPE)?;
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, API_VERSION
        );
        let body = serde_json::to_string(&EmbeddingsBody {
            model: &self.deployment,
            request,
        })
        .map_err(Error::SerializationError)?;
        let response = self.do_request(url, &token.token, body)?;

        serde_json::from_str(&response).map_err(Error::DeserializationError)
    }
}
