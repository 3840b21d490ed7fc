//! Tests for the token sources and the default chain, against mock
//! authority and metadata endpoints.

use mini_azure_openai::credentials::{
    ClientSecretCredential, DefaultCredentialChain, ManagedIdentityCredential,
    StaticTokenCredential, TokenCredential,
};
use mini_azure_openai::{Error, COGNITIVE_SERVICES_SCOPE};
use mockito::{Matcher, Server};
use serde_json::json;

#[test]
fn client_secret_posts_the_grant_and_parses_the_token() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/test-tenant/oauth2/v2.0/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("client_id".into(), "test-client".into()),
            Matcher::UrlEncoded("client_secret".into(), "test-secret".into()),
            Matcher::UrlEncoded("scope".into(), COGNITIVE_SERVICES_SCOPE.into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "aad-token",
            })
            .to_string(),
        )
        .expect(1)
        .create();

    let credential = ClientSecretCredential::with_authority(
        server.url(),
        "test-tenant".to_string(),
        "test-client".to_string(),
        "test-secret".to_string(),
    );

    let token = credential
        .token(COGNITIVE_SERVICES_SCOPE)
        .expect("token request failed");
    assert_eq!(token.token, "aad-token");

    mock.assert();
}

#[test]
fn rejected_grant_is_a_credential_error() {
    let mut server = Server::new();
    let _mock = server
        .mock("POST", "/test-tenant/oauth2/v2.0/token")
        .with_status(400)
        .with_body(json!({"error": "invalid_client"}).to_string())
        .create();

    let credential = ClientSecretCredential::with_authority(
        server.url(),
        "test-tenant".to_string(),
        "test-client".to_string(),
        "wrong-secret".to_string(),
    );

    let err = credential.token(COGNITIVE_SERVICES_SCOPE).unwrap_err();
    match err {
        Error::CredentialError(message) => {
            assert!(message.contains("400"), "unexpected message: {}", message)
        }
        other => panic!("expected CredentialError, got {:?}", other),
    }
}

#[test]
fn malformed_token_body_is_a_credential_error() {
    let mut server = Server::new();
    let _mock = server
        .mock("POST", "/test-tenant/oauth2/v2.0/token")
        .with_status(200)
        .with_body("not json")
        .create();

    let credential = ClientSecretCredential::with_authority(
        server.url(),
        "test-tenant".to_string(),
        "test-client".to_string(),
        "test-secret".to_string(),
    );

    let err = credential.token(COGNITIVE_SERVICES_SCOPE).unwrap_err();
    match err {
        Error::CredentialError(message) => {
            assert!(
                message.contains("malformed token response"),
                "unexpected message: {}",
                message
            )
        }
        other => panic!("expected CredentialError, got {:?}", other),
    }
}

#[test]
fn managed_identity_queries_imds_with_the_bare_resource() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/metadata/identity/oauth2/token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("api-version".into(), "2018-02-01".into()),
            Matcher::UrlEncoded(
                "resource".into(),
                "https://cognitiveservices.azure.com".into(),
            ),
        ]))
        .match_header("metadata", "true")
        .with_status(200)
        // IMDS returns expires_in as a string; only access_token is read.
        .with_body(
            json!({
                "access_token": "imds-token",
                "expires_in": "3599",
                "token_type": "Bearer",
            })
            .to_string(),
        )
        .expect(1)
        .create();

    let credential = ManagedIdentityCredential::with_endpoint(server.url());
    let token = credential
        .token(COGNITIVE_SERVICES_SCOPE)
        .expect("token request failed");
    assert_eq!(token.token, "imds-token");

    mock.assert();
}

#[test]
fn chain_falls_through_to_the_next_source() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/test-tenant/oauth2/v2.0/token")
        .with_status(401)
        .with_body("no")
        .expect(1)
        .create();

    let failing = ClientSecretCredential::with_authority(
        server.url(),
        "test-tenant".to_string(),
        "test-client".to_string(),
        "test-secret".to_string(),
    );
    let chain = DefaultCredentialChain::from_sources(vec![
        ("environment", Box::new(failing)),
        ("fallback", Box::new(StaticTokenCredential::new("fallback-token"))),
    ]);

    let token = chain
        .token(COGNITIVE_SERVICES_SCOPE)
        .expect("chain produced no token");
    assert_eq!(token.token, "fallback-token");

    mock.assert();
}

#[test]
fn exhausted_chain_names_every_source() {
    let mut server = Server::new();
    let _mock = server
        .mock("POST", "/test-tenant/oauth2/v2.0/token")
        .with_status(401)
        .with_body("no")
        .create();

    let failing = ClientSecretCredential::with_authority(
        server.url(),
        "test-tenant".to_string(),
        "test-client".to_string(),
        "test-secret".to_string(),
    );
    let chain = DefaultCredentialChain::from_sources(vec![("environment", Box::new(failing))]);

    let err = chain.token(COGNITIVE_SERVICES_SCOPE).unwrap_err();
    match err {
        Error::CredentialError(message) => {
            assert!(
                message.contains("environment"),
                "unexpected message: {}",
                message
            )
        }
        other => panic!("expected CredentialError, got {:?}", other),
    }
}
