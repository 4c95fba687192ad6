//! Enforcement middleware for FHIR routes.
//!
//! Every request passes, in order: authentication and revocation, endpoint
//! RBAC, resource ABAC, SMART scopes, consent (when ABAC requires it) and,
//! for writes carrying an `Idempotency-Key`, the replay cache.
//!
//! ```ignore
//! let fhir = Router::new()
//!     .route("/fhir/{*path}", any(gateway))
//!     .route_layer(axum::middleware::from_fn_with_state(services.clone(), enforce));
//! ```

use axum::{
    body::{Body, HttpBody, to_bytes},
    extract::{OriginalUri, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::credentials::{IdempotencyLookup, IdempotencyRecord};
use crate::error::AuthError;
use crate::identity::RequestIdentity;
use crate::middleware::authenticate::authenticate;
use crate::policy::{
    AbacDecision, ConsentAction, DenyReason, operation_for_method, resolve_patient_target,
};
use crate::services::AuthServices;

/// Request header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Response header marking a replayed response.
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "idempotency-replayed";

/// Authorizes the request, then runs it at most once per idempotency key.
pub async fn enforce(
    State(services): State<AuthServices>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let path = full_path(&parts);
    let authorized = authorize_request(
        &services,
        &parts.method,
        &path,
        parts.uri.query(),
        &parts.headers,
    )
    .await;
    let (identity, obligations) = match authorized {
        Ok(result) => result,
        Err(err) => return err.into_response(),
    };

    let idempotency_key = idempotency_key(&parts, &identity);
    parts.extensions.insert(identity);
    if let Some(decision) = obligations {
        parts.extensions.insert(decision);
    }
    let request = Request::from_parts(parts, body);

    match idempotency_key {
        Some(key) => run_idempotent(&services, key, request, next)
            .await
            .unwrap_or_else(IntoResponse::into_response),
        None => next.run(request).await,
    }
}

// =============================================================================
// Authorization
// =============================================================================

fn full_path(parts: &Parts) -> String {
    parts
        .extensions
        .get::<OriginalUri>()
        .map_or_else(|| parts.uri.path(), |uri| uri.0.path())
        .to_string()
}

/// A FHIR request path, percent-decoded and split relative to the base.
#[derive(Debug, PartialEq, Eq)]
struct FhirPath {
    segments: Vec<String>,
}

impl FhirPath {
    /// Decodes `relative` one segment at a time.
    ///
    /// Dot segments, empty inner segments, encoded slashes, double encoding
    /// and invalid UTF-8 are rejected so that policy sees the same path the
    /// handler routes on.
    fn parse(relative: &str) -> AuthResult<Self> {
        let trimmed = relative.strip_prefix('/').unwrap_or(relative);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self {
                segments: Vec::new(),
            });
        }

        let segments = trimmed
            .split('/')
            .map(|raw| {
                let segment = percent_decode_str(raw)
                    .decode_utf8()
                    .map_err(|_| AuthError::invalid_request("FHIR path is not valid UTF-8"))?;
                if segment.is_empty()
                    || segment == "."
                    || segment == ".."
                    || segment.contains('/')
                    || segment.contains('%')
                {
                    return Err(AuthError::invalid_request(format!(
                        "malformed FHIR path segment '{raw}'"
                    )));
                }
                Ok(segment.into_owned())
            })
            .collect::<AuthResult<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Decoded path relative to the FHIR base, without a leading slash.
    fn relative(&self) -> String {
        self.segments.join("/")
    }

    /// Resource type addressed.
    ///
    /// Only segments that look like FHIR resource type names count;
    /// `metadata`, `$operations` and `_history` do not. A compartment
    /// search (`Patient/123/Observation`) addresses the inner type.
    fn resource_type(&self) -> Option<&str> {
        let first = self.segments.first().filter(|s| is_type_name(s))?;
        let addressed = match self.segments.get(2) {
            Some(inner) if is_type_name(inner) => inner,
            _ => first,
        };
        Some(addressed.as_str())
    }
}

fn is_type_name(segment: &str) -> bool {
    segment.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

async fn authorize_request(
    services: &AuthServices,
    method: &Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> AuthResult<(RequestIdentity, Option<AbacDecision>)> {
    let identity = authenticate(services, headers).await?;
    let method = method.as_str();

    let relative = path.strip_prefix(services.fhir_path()).unwrap_or(path);
    let fhir_path = FhirPath::parse(relative)?;
    let relative = fhir_path.relative();
    let canonical = format!("{}/{relative}", services.fhir_path());

    services
        .policy
        .authorize_endpoint(&identity, method, &canonical)
        .into_result()?;

    let Some(resource_type) = fhir_path.resource_type() else {
        return Ok((identity, None));
    };

    let decision = services.policy.evaluate_resource(&identity, resource_type);
    if !decision.allowed {
        return Err(DenyReason::abac(&decision).into());
    }

    let target = resolve_patient_target(&relative, query);
    services
        .policy
        .check_scopes(&identity, resource_type, operation_for_method(method), &target)
        .into_result()?;

    if decision.consent_required {
        services
            .consent
            .check_cancellable(
                &identity,
                target.patient_id(),
                ConsentAction::from_method(method),
                &services.shutdown_token(),
            )
            .await
            .map_err(|e| {
                tracing::debug!(
                    subject = %identity.subject,
                    resource_type,
                    error = %e,
                    "Consent check failed"
                );
                AuthError::from(DenyReason::consent(e.to_string()))
            })?;
    }
    if decision.care_team_required {
        tracing::debug!(
            subject = %identity.subject,
            resource_type,
            "Care team obligation passed to handler"
        );
    }

    Ok((identity, Some(decision)))
}

// =============================================================================
// Idempotency
// =============================================================================

/// Cache key for a write request, namespaced by the caller.
fn idempotency_key(parts: &Parts, identity: &RequestIdentity) -> Option<String> {
    if !matches!(
        parts.method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) {
        return None;
    }
    let key = parts
        .headers
        .get(IDEMPOTENCY_KEY_HEADER)?
        .to_str()
        .ok()?
        .trim();
    (!key.is_empty()).then(|| format!("{}:{key}", identity.subject))
}

async fn run_idempotent(
    services: &AuthServices,
    key: String,
    request: Request,
    next: Next,
) -> AuthResult<Response> {
    let method = request.method().to_string();
    let path = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string);

    match services.idempotency.lookup(&key, &method, &path).await? {
        IdempotencyLookup::Replay(record) => {
            tracing::debug!(method = %method, path = %path, "Replaying idempotent response");
            return replay(record);
        }
        IdempotencyLookup::Mismatch {
            method: original_method,
            path: original_path,
        } => {
            return Err(AuthError::idempotency_mismatch(format!(
                "Idempotency-Key was already used for {original_method} {original_path}"
            )));
        }
        IdempotencyLookup::Miss => {}
    }

    let response = next.run(request).await;
    let max_body = services.config.idempotency.max_body_bytes;
    let cacheable = !response.status().is_server_error()
        && response
            .body()
            .size_hint()
            .exact()
            .is_some_and(|len| len <= max_body as u64);
    if !cacheable {
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, max_body)
        .await
        .map_err(|e| AuthError::internal(format!("failed to buffer response: {e}")))?;

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    services
        .idempotency
        .set(IdempotencyRecord {
            key,
            method,
            path,
            status: parts.status.as_u16(),
            headers,
            body: bytes.to_vec(),
            created_at: OffsetDateTime::now_utc(),
        })
        .await?;

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

fn replay(record: IdempotencyRecord) -> AuthResult<Response> {
    let status = StatusCode::from_u16(record.status)
        .map_err(|e| AuthError::internal(format!("cached status: {e}")))?;
    let mut response = Response::new(Body::from(record.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &record.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers.insert(IDEMPOTENCY_REPLAYED_HEADER, HeaderValue::from_static("true"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, http::header::AUTHORIZATION, routing::any};
    use tower::ServiceExt;

    use crate::config::AuthConfig;
    use crate::policy::{AbacPolicy, ConsentDirective, ConsentKind, RbacRule};
    use crate::token::{AccessTokenClaims, new_jti};

    fn services(configure: impl FnOnce(&mut AuthConfig)) -> AuthServices {
        let mut config = AuthConfig::default();
        config.signing.secret = Some("0123456789abcdef0123456789abcdef".to_string());
        configure(&mut config);
        AuthServices::in_memory(config).unwrap()
    }

    fn token(services: &AuthServices, scope: &str, roles: &[&str], patient: Option<&str>) -> String {
        let jwt = services.authority.jwt();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        jwt.encode(&AccessTokenClaims {
            iss: jwt.issuer().to_string(),
            sub: "user-1".to_string(),
            aud: jwt.audience().to_string(),
            exp: now + 300,
            iat: now,
            jti: new_jti(),
            scope: scope.to_string(),
            client_id: "app".to_string(),
            patient: patient.map(ToString::to_string),
            encounter: None,
            fhir_user: None,
            roles: roles.iter().map(ToString::to_string).collect(),
        })
        .unwrap()
    }

    fn app(services: &AuthServices, calls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/fhir/{*path}",
                any(move || {
                    let calls = calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        (StatusCode::CREATED, format!("call {n}"))
                    }
                }),
            )
            .route_layer(axum::middleware::from_fn_with_state(
                services.clone(),
                enforce,
            ))
    }

    fn request(method: &str, uri: &str, token: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
    }

    async fn status(app: &Router, request: Request) -> StatusCode {
        app.clone().oneshot(request).await.unwrap().status()
    }

    fn resource_type(relative: &str) -> Option<String> {
        FhirPath::parse(relative)
            .unwrap()
            .resource_type()
            .map(ToString::to_string)
    }

    #[test]
    fn test_resource_type_detection() {
        assert_eq!(resource_type("/Patient/123").as_deref(), Some("Patient"));
        assert_eq!(resource_type("Observation").as_deref(), Some("Observation"));
        assert_eq!(resource_type("/%50atient/456").as_deref(), Some("Patient"));
        assert_eq!(
            resource_type("/Patient/123/Observation").as_deref(),
            Some("Observation")
        );
        assert_eq!(resource_type("/Patient/123/_history").as_deref(), Some("Patient"));
        assert_eq!(resource_type("/metadata"), None);
        assert_eq!(resource_type("/$export"), None);
        assert_eq!(resource_type(""), None);
    }

    #[test]
    fn test_malformed_paths_rejected() {
        for path in [
            "/Patient/123/../456",
            "/Patient/./123",
            "/Patient//123",
            "/Patient/..%2F456",
            "/Patient%2F456",
            "/%2550atient/456",
            "/Patient/%FF",
        ] {
            assert!(
                matches!(FhirPath::parse(path), Err(AuthError::InvalidRequest { .. })),
                "{path}"
            );
        }
        assert_eq!(
            FhirPath::parse("/Patient/123/").unwrap().relative(),
            "Patient/123"
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_request_rejected() {
        let services = services(|_| {});
        let app = app(&services, Arc::default());
        let request = Request::builder()
            .uri("/fhir/Patient/123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_patient_context_enforced() {
        let services = services(|_| {});
        let app = app(&services, Arc::default());
        let token = token(&services, "patient/Patient.read", &["patient"], Some("123"));

        let own = request("GET", "/fhir/Patient/123", &token).body(Body::empty()).unwrap();
        assert_eq!(status(&app, own).await, StatusCode::CREATED);

        let other = request("GET", "/fhir/Patient/456", &token).body(Body::empty()).unwrap();
        assert_eq!(status(&app, other).await, StatusCode::FORBIDDEN);

        let write = request("PUT", "/fhir/Patient/123", &token).body(Body::empty()).unwrap();
        assert_eq!(status(&app, write).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_rbac_and_abac() {
        let services = services(|config| {
            config
                .policy
                .rbac
                .push(RbacRule::new("/fhir/Observation", &["practitioner"]).with_methods(&["POST"]));
        });
        let app = app(&services, Arc::default());

        let patient = token(&services, "user/*.*", &["patient"], None);
        let write = request("POST", "/fhir/Observation", &patient).body(Body::empty()).unwrap();
        assert_eq!(status(&app, write).await, StatusCode::FORBIDDEN);

        let practitioner = token(&services, "user/*.*", &["practitioner"], None);
        let write = request("POST", "/fhir/Observation", &practitioner)
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, write).await, StatusCode::CREATED);

        // No ABAC policy for Basic.
        let read = request("GET", "/fhir/Basic/1", &practitioner).body(Body::empty()).unwrap();
        assert_eq!(status(&app, read).await, StatusCode::FORBIDDEN);

        // Non-resource paths skip resource checks.
        let metadata = request("GET", "/fhir/metadata", &patient).body(Body::empty()).unwrap();
        assert_eq!(status(&app, metadata).await, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_consent_required() {
        let services = services(|config| {
            config.policy.abac.push(AbacPolicy {
                resource_type: "Observation".to_string(),
                allowed_roles: vec!["practitioner".to_string()],
                consent_required: true,
                care_team_required: false,
            });
            config.consent.directives.push(ConsentDirective {
                id: "c-123".to_string(),
                patient_id: "123".to_string(),
                kind: ConsentKind::Permit,
                actions: Vec::new(),
                status: Default::default(),
                expires_at: None,
            });
        });
        services.bootstrap().await.unwrap();
        let app = app(&services, Arc::default());
        let token = token(&services, "user/Observation.read", &["practitioner"], None);

        let permitted = request("GET", "/fhir/Observation?patient=123", &token)
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, permitted).await, StatusCode::CREATED);

        let no_consent = request("GET", "/fhir/Observation?patient=456", &token)
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, no_consent).await, StatusCode::FORBIDDEN);

        let unresolved = request("GET", "/fhir/Observation", &token).body(Body::empty()).unwrap();
        assert_eq!(status(&app, unresolved).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_encoded_path_cannot_skip_resource_checks() {
        let services = services(|_| {});
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&services, calls.clone());
        let token = token(&services, "patient/Observation.read", &["patient"], Some("123"));

        for uri in [
            "/fhir/Patient/456",
            "/fhir/%50atient/456",
            "/fhir/%50atient/456/_history",
            "/fhir/Patient/%34%35%36",
        ] {
            let delete = request("DELETE", uri, &token).body(Body::empty()).unwrap();
            assert_eq!(status(&app, delete).await, StatusCode::FORBIDDEN, "{uri}");
        }

        let traversal = request("GET", "/fhir/Patient/123/../456", &token)
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, traversal).await, StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rbac_matches_decoded_path() {
        let services = services(|config| {
            config
                .policy
                .rbac
                .push(RbacRule::new("/fhir/Patient", &["practitioner"]));
        });
        let app = app(&services, Arc::default());
        let nurse = token(&services, "user/*.*", &["nurse"], None);

        let encoded = request("GET", "/fhir/%50atient/1", &nurse).body(Body::empty()).unwrap();
        assert_eq!(status(&app, encoded).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_patient_scope_requires_single_target() {
        let services = services(|_| {});
        let app = app(&services, Arc::default());
        let token = token(&services, "patient/Observation.read", &["patient"], Some("123"));

        let own = request("GET", "/fhir/Observation?patient=123", &token)
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, own).await, StatusCode::CREATED);

        let compartment = request("GET", "/fhir/Patient/123/Observation", &token)
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, compartment).await, StatusCode::CREATED);

        for uri in [
            "/fhir/Observation?patient=456",
            "/fhir/Observation?patient=456&patient=123",
            "/fhir/Observation?patient=123,456",
            "/fhir/Observation?subject=456",
            "/fhir/Observation?subject:Patient=456",
            "/fhir/Observation",
            "/fhir/Observation/obs-of-456",
            "/fhir/Patient/456/Observation",
        ] {
            let read = request("GET", uri, &token).body(Body::empty()).unwrap();
            assert_eq!(status(&app, read).await, StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_consent_deny_applies_to_every_named_patient() {
        let services = services(|config| {
            config.policy.abac.push(AbacPolicy {
                resource_type: "Observation".to_string(),
                allowed_roles: vec!["practitioner".to_string()],
                consent_required: true,
                care_team_required: false,
            });
            for (id, patient, kind) in [
                ("c-123", "123", ConsentKind::Permit),
                ("c-456", "456", ConsentKind::Deny),
            ] {
                config.consent.directives.push(ConsentDirective {
                    id: id.to_string(),
                    patient_id: patient.to_string(),
                    kind,
                    actions: Vec::new(),
                    status: Default::default(),
                    expires_at: None,
                });
            }
        });
        services.bootstrap().await.unwrap();
        let app = app(&services, Arc::default());
        let token = token(&services, "user/Observation.read", &["practitioner"], None);

        let permitted = request("GET", "/fhir/Observation?patient=123", &token)
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, permitted).await, StatusCode::CREATED);

        for uri in [
            "/fhir/Observation?patient=456",
            "/fhir/Observation?patient=456&patient=123",
            "/fhir/Observation?subject=Patient/456&patient=123",
            "/fhir/Observation?subject=456",
        ] {
            let read = request("GET", uri, &token).body(Body::empty()).unwrap();
            assert_eq!(status(&app, read).await, StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_idempotent_replay_and_mismatch() {
        let services = services(|_| {});
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&services, calls.clone());
        let token = token(&services, "user/*.*", &["practitioner"], None);

        let post = || {
            request("POST", "/fhir/Patient", &token)
                .header(IDEMPOTENCY_KEY_HEADER, "abc")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(post()).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        assert!(first.headers().get(IDEMPOTENCY_REPLAYED_HEADER).is_none());

        let second = app.clone().oneshot(post()).await.unwrap();
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(second.headers().get(IDEMPOTENCY_REPLAYED_HEADER).unwrap(), "true");
        let body = to_bytes(second.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"call 1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other_path = request("POST", "/fhir/Observation", &token)
            .header(IDEMPOTENCY_KEY_HEADER, "abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(&app, other_path).await, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reads_and_unkeyed_writes_not_cached() {
        let services = services(|_| {});
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&services, calls.clone());
        let token = token(&services, "user/*.*", &["practitioner"], None);

        for _ in 0..2 {
            let get = request("GET", "/fhir/Patient/1", &token)
                .header(IDEMPOTENCY_KEY_HEADER, "read-key")
                .body(Body::empty())
                .unwrap();
            status(&app, get).await;
            let post = request("POST", "/fhir/Patient", &token)
                .header(IDEMPOTENCY_KEY_HEADER, "")
                .body(Body::empty())
                .unwrap();
            status(&app, post).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        for key in ["user-1:read-key", "user-1:"] {
            assert!(services.idempotency.get(key).await.unwrap().is_none());
        }
    }
}
