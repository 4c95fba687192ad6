//! The assembled authorization subsystem.
//!
//! [`AuthServices`] is built once at startup and shared with every handler
//! and middleware through axum state. Nothing in the crate reaches for a
//! global; swapping a backend means passing a different [`AuthStores`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::backend::{BackendAuthConfig, BackendServiceAuthenticator};
use crate::config::AuthConfig;
use crate::credentials::{ApiKeyManager, IdempotencyStore, NewApiKey, RevocationStore};
use crate::error::AuthError;
use crate::federation::ExternalTokenValidator;
use crate::oauth::{AuthorityLifetimes, AuthorityStorage, TokenAuthority};
use crate::policy::{ADMIN_ROLE, ConsentEnforcer, PolicyEngine};
use crate::smart::SmartConfiguration;
use crate::storage::{
    ApiKeyStorage, ConsentStorage, IdempotencyStorage, InMemoryApiKeyStorage,
    InMemoryConsentStorage, InMemoryJtiStorage, JtiStorage, RevocationStorage,
};
use crate::tasks::{MaintenanceTasks, Sweep};
use crate::token::JwtService;

/// Scope granted to the bootstrap admin key.
const BOOTSTRAP_ADMIN_SCOPE: &str = "system/*.*";

/// Every persistent store, one trait object each.
#[derive(Clone)]
pub struct AuthStores {
    pub authority: AuthorityStorage,
    pub jti: Arc<dyn JtiStorage>,
    pub consent: Arc<dyn ConsentStorage>,
    pub api_keys: Arc<dyn ApiKeyStorage>,
    pub revocations: Arc<dyn RevocationStorage>,
    pub idempotency: Arc<dyn IdempotencyStorage>,
}

impl AuthStores {
    /// In-memory stores; the idempotency TTL comes from `config`.
    #[must_use]
    pub fn in_memory(config: &AuthConfig) -> Self {
        Self {
            authority: AuthorityStorage::in_memory(),
            jti: Arc::new(InMemoryJtiStorage::new()),
            consent: Arc::new(InMemoryConsentStorage::new()),
            api_keys: Arc::new(InMemoryApiKeyStorage::new()),
            revocations: Arc::new(RevocationStore::new()),
            idempotency: Arc::new(IdempotencyStore::from_config(&config.idempotency)),
        }
    }
}

/// Runs a store's expiry cleanup as a maintenance sweep.
struct StoreSweep<S: ?Sized> {
    name: &'static str,
    store: Arc<S>,
}

#[async_trait]
impl Sweep for StoreSweep<dyn RevocationStorage> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn sweep(&self) -> AuthResult<u64> {
        self.store.cleanup_expired().await
    }
}

#[async_trait]
impl Sweep for StoreSweep<dyn IdempotencyStorage> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn sweep(&self) -> AuthResult<u64> {
        self.store.cleanup_expired().await
    }
}

/// Shared state of the auth router and the enforcement middleware.
#[derive(Clone)]
pub struct AuthServices {
    pub config: Arc<AuthConfig>,
    pub authority: TokenAuthority,
    pub backend: BackendServiceAuthenticator,
    pub external: Option<ExternalTokenValidator>,
    pub api_keys: ApiKeyManager,
    pub revocations: Arc<dyn RevocationStorage>,
    pub idempotency: Arc<dyn IdempotencyStorage>,
    pub policy: Arc<PolicyEngine>,
    pub consent: ConsentEnforcer,
    pub discovery: Arc<SmartConfiguration>,
    /// Path of the FHIR base URL (`/fhir`), stripped before resource checks.
    fhir_path: String,
    shutdown: CancellationToken,
}

impl AuthServices {
    /// Wires every component over the given stores.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the signing secret is too weak, the FHIR
    /// base URL is not a URL, or the key cache cannot be built.
    pub fn new(config: AuthConfig, stores: AuthStores) -> AuthResult<Self> {
        let jwt = Arc::new(
            JwtService::from_config(&config).map_err(|e| AuthError::configuration(e.to_string()))?,
        );
        let fhir_path = url::Url::parse(&config.fhir_base_url)
            .map_err(|e| AuthError::configuration(format!("fhir_base_url: {e}")))?
            .path()
            .trim_end_matches('/')
            .to_string();

        let authority = TokenAuthority::new(
            jwt.clone(),
            stores.authority.clone(),
            AuthorityLifetimes::from_config(&config),
        );
        let backend = BackendServiceAuthenticator::new(
            BackendAuthConfig::from_config(&config),
            stores.authority.clients.clone(),
            stores.jti,
            jwt,
        );
        let external = ExternalTokenValidator::from_config(&config.federation)
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        Ok(Self {
            authority,
            backend,
            external,
            api_keys: ApiKeyManager::new(stores.api_keys, &config.api_keys),
            revocations: stores.revocations,
            idempotency: stores.idempotency,
            policy: Arc::new(PolicyEngine::from_config(&config.policy)),
            consent: ConsentEnforcer::new(stores.consent, config.consent.lookup_timeout),
            discovery: Arc::new(SmartConfiguration::from_config(&config)),
            fhir_path,
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
        })
    }

    /// All components over in-memory stores.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn in_memory(config: AuthConfig) -> AuthResult<Self> {
        let stores = AuthStores::in_memory(&config);
        Self::new(config, stores)
    }

    /// Loads the startup credentials: static clients, the admin API key and
    /// consent directives.
    ///
    /// # Errors
    ///
    /// Returns the first registration or import failure.
    pub async fn bootstrap(&self) -> AuthResult<()> {
        for definition in &self.config.bootstrap.clients {
            self.authority
                .register_client(definition.clone().into_client())
                .await?;
        }

        if let Some(raw_key) = &self.config.bootstrap.admin_api_key {
            let key = self
                .api_keys
                .import_key(
                    raw_key,
                    NewApiKey {
                        name: "bootstrap-admin".to_string(),
                        roles: vec![ADMIN_ROLE.to_string()],
                        scopes: vec![BOOTSTRAP_ADMIN_SCOPE.to_string()],
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!(key_id = %key.id, "Bootstrap admin API key loaded");
        }

        for directive in &self.config.consent.directives {
            self.consent.storage().put(directive.clone()).await?;
        }
        if !self.config.consent.directives.is_empty() {
            tracing::info!(
                count = self.config.consent.directives.len(),
                "Consent directives loaded"
            );
        }
        Ok(())
    }

    /// Components with expiring state.
    #[must_use]
    pub fn sweepers(&self) -> Vec<Arc<dyn Sweep>> {
        let authority: Arc<dyn Sweep> = Arc::new(self.authority.clone());
        let replay_cache: Arc<dyn Sweep> = Arc::new(self.backend.clone());
        let revocations: Arc<dyn Sweep> = Arc::new(StoreSweep {
            name: "revocations",
            store: self.revocations.clone(),
        });
        let idempotency: Arc<dyn Sweep> = Arc::new(StoreSweep {
            name: "idempotency",
            store: self.idempotency.clone(),
        });
        vec![authority, replay_cache, revocations, idempotency]
    }

    /// Starts one periodic sweep per component at the configured interval.
    #[must_use]
    pub fn spawn_maintenance(&self) -> MaintenanceTasks {
        let mut tasks = MaintenanceTasks::new();
        for sweeper in self.sweepers() {
            tasks.spawn(sweeper, self.config.maintenance.sweep_interval);
        }
        tasks
    }

    /// Path prefix of FHIR requests, without a trailing slash.
    #[must_use]
    pub fn fhir_path(&self) -> &str {
        &self.fhir_path
    }

    /// Fires when the process shuts down; outstanding key and consent
    /// lookups fail closed.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels outstanding lookups. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
