use std::net::{Ipv4Addr, SocketAddr};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use smartgate_auth::types::ClientDefinition;
use smartgate_server::{AppConfig, ServerBuilder};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

const ADMIN_KEY: &str = "sgk_integration-admin-key-0123456789";
const APP_REDIRECT: &str = "https://app.example.com/callback";
const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

struct TestServer {
    base: String,
    token_endpoint: String,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

struct BackendKey {
    encoding: EncodingKey,
    jwks: Value,
}

fn backend_key() -> BackendKey {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let pem = private.to_pkcs1_pem(LineEnding::LF).unwrap();
    let public = private.to_public_key();
    BackendKey {
        encoding: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
        jwks: json!({
            "keys": [{
                "kty": "RSA",
                "kid": "bulk-1",
                "alg": "RS384",
                "use": "sig",
                "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
            }]
        }),
    }
}

async fn start_server(backend_jwks: Option<Value>) -> TestServer {
    let mut cfg = AppConfig::default();
    cfg.auth.signing.secret = Some("integration-secret-0123456789abcdef".to_string());
    cfg.auth.bootstrap.admin_api_key = Some(ADMIN_KEY.to_string());
    cfg.auth.bootstrap.clients.push(ClientDefinition {
        client_id: "growth-chart".to_string(),
        redirect_uris: vec![APP_REDIRECT.to_string()],
        scopes: vec![
            "launch".to_string(),
            "patient/Patient.read".to_string(),
            "patient/Observation.read".to_string(),
        ],
        roles: vec!["patient".to_string()],
        ..Default::default()
    });
    if let Some(jwks) = backend_jwks {
        cfg.auth.bootstrap.clients.push(ClientDefinition {
            client_id: "bulk-exporter".to_string(),
            scopes: vec!["system/*.read".to_string()],
            roles: vec!["system".to_string()],
            jwks: Some(serde_json::from_value(jwks).unwrap()),
            ..Default::default()
        });
    }
    let token_endpoint = cfg.auth.token_endpoint();

    let listener = tokio::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let server = ServerBuilder::new().with_config(cfg).build().await.unwrap();
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        token_endpoint,
        shutdown,
        handle,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn pkce_pair() -> (String, String) {
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

#[tokio::test]
async fn healthz_and_discovery() {
    let server = start_server(None).await;
    let http = client();

    let resp = http
        .get(format!("{}/healthz", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = http
        .get(format!("{}/.well-known/smart-configuration", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["token_endpoint"], server.token_endpoint.as_str());

    let resp = http
        .get(format!("{}/fhir/Patient/123", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().contains_key("www-authenticate"));

    server.stop().await;
}

#[tokio::test]
async fn ehr_launch_code_flow_confines_token_to_patient() {
    let server = start_server(None).await;
    let http = client();

    // EHR registers the launch context.
    let resp = http
        .post(format!("{}/auth/launch", server.base))
        .header("x-api-key", ADMIN_KEY)
        .json(&json!({"patient": "123", "user": "Practitioner/9"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let launch: Value = resp.json().await.unwrap();
    let launch_id = launch["launch"].as_str().unwrap().to_string();

    // App authorizes with PKCE.
    let (verifier, challenge) = pkce_pair();
    let resp = http
        .get(format!("{}/auth/authorize", server.base))
        .query(&[
            ("response_type", "code"),
            ("client_id", "growth-chart"),
            ("redirect_uri", APP_REDIRECT),
            ("scope", "launch patient/Patient.read patient/Observation.read"),
            ("state", "af0ifjsldkj"),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("launch", launch_id.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
    let location = Url::parse(
        resp.headers()
            .get("location")
            .unwrap()
            .to_str()
            .unwrap(),
    )
    .unwrap();
    assert!(location.as_str().starts_with(APP_REDIRECT));
    let params: std::collections::HashMap<_, _> = location.query_pairs().into_owned().collect();
    assert_eq!(params["state"], "af0ifjsldkj");
    let code = params["code"].clone();

    let exchange = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", APP_REDIRECT),
        ("client_id", "growth-chart"),
        ("code_verifier", verifier.as_str()),
    ];
    let resp = http
        .post(format!("{}/auth/token", server.base))
        .form(&exchange)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    let token: Value = resp.json().await.unwrap();
    assert_eq!(token["patient"], "123");
    assert_eq!(token["token_type"], "Bearer");
    let access = token["access_token"].as_str().unwrap().to_string();

    // Codes are single use.
    let resp = http
        .post(format!("{}/auth/token", server.base))
        .form(&exchange)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");

    // The token reaches its own patient only.
    let resp = http
        .get(format!("{}/fhir/Patient/123", server.base))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["identity"]["patient"], "123");

    let resp = http
        .get(format!("{}/fhir/Observation?patient=123", server.base))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = http
        .get(format!("{}/fhir/Patient/456", server.base))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = http
        .post(format!("{}/fhir/Observation", server.base))
        .bearer_auth(&access)
        .json(&json!({"resourceType": "Observation"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Revoked tokens stop working at once.
    let resp = http
        .post(format!("{}/auth/revoke", server.base))
        .form(&[("token", access.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = http
        .get(format!("{}/fhir/Patient/123", server.base))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = http
        .post(format!("{}/auth/introspect", server.base))
        .form(&[("token", access.as_str())])
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["active"], false);

    server.stop().await;
}

#[tokio::test]
async fn backend_service_assertion_is_single_use() {
    let key = backend_key();
    let server = start_server(Some(key.jwks.clone())).await;
    let http = client();

    let now = OffsetDateTime::now_utc().unix_timestamp();
    let mut header = Header::new(Algorithm::RS384);
    header.kid = Some("bulk-1".to_string());
    let assertion = jsonwebtoken::encode(
        &header,
        &json!({
            "iss": "bulk-exporter",
            "sub": "bulk-exporter",
            "aud": server.token_endpoint,
            "jti": "assertion-1",
            "iat": now,
            "exp": now + 120,
        }),
        &key.encoding,
    )
    .unwrap();

    let form = [
        ("grant_type", "client_credentials"),
        ("client_assertion_type", ASSERTION_TYPE),
        ("client_assertion", assertion.as_str()),
    ];
    let resp = http
        .post(format!("{}/auth/token", server.base))
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let token: Value = resp.json().await.unwrap();
    assert_eq!(token["scope"], "system/*.read");
    assert!(token.get("refresh_token").is_none());
    let access = token["access_token"].as_str().unwrap().to_string();

    let resp = http
        .get(format!("{}/fhir/Observation", server.base))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = http
        .delete(format!("{}/fhir/Observation/1", server.base))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Same assertion again: replay.
    let resp = http
        .post(format!("{}/auth/token", server.base))
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_client");

    server.stop().await;
}

#[tokio::test]
async fn idempotent_writes_replay_with_api_key() {
    let server = start_server(None).await;
    let http = client();

    let create = || {
        http.post(format!("{}/fhir/Observation", server.base))
            .header("x-api-key", ADMIN_KEY)
            .header("idempotency-key", "obs-create-1")
            .json(&json!({"resourceType": "Observation"}))
    };

    let first = create().send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.headers().get("idempotency-replayed").is_none());
    let first_body: Value = first.json().await.unwrap();

    let second = create().send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["idempotency-replayed"], "true");
    let second_body: Value = second.json().await.unwrap();
    assert_eq!(first_body, second_body);

    let resp = http
        .post(format!("{}/fhir/Condition", server.base))
        .header("x-api-key", ADMIN_KEY)
        .header("idempotency-key", "obs-create-1")
        .json(&json!({"resourceType": "Condition"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);

    server.stop().await;
}
