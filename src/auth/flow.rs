//! Authorization Code + PKCE flow orchestration.
//!
//! The flow is:
//!
//! 1. [`PkceFlow::begin`]: generate verifier, challenge, and state, then store them
//! 2. Redirect the browser to [`AuthorizationEndpoint::authorization_url`]
//! 3. Provider redirects back with `code` and `state`
//! 4. [`PkceFlow::complete`]: retrieve the record and check the state
//! 5. Caller exchanges `code` + verifier at the token endpoint
//! 6. Record is deleted ([`PkceFlow::consume`], or automatically via [`PkceFlow::finish`])
//!
//! The token request itself belongs to the caller; this module never talks
//! to the network.
//!
//! Security events (state mismatches) are logged with `warn!` under the
//! `inbox_pkce::security` target so they can be routed and alerted on
//! separately from ordinary flow failures.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::callback::CallbackParams;
use super::pkce::{generate_verifier_with_len, CodeChallenge, CodeVerifier, CHALLENGE_METHOD};
use super::state::{generate_state, states_match};
use super::storage::SessionStorage;
use super::store::{ParameterStore, PkceParams};
use super::FlowContext;
use crate::config::PkceConfig;
use crate::error::{FlowError, FlowResult, PkceError};

/// Log target for security-relevant events.
pub const SECURITY_TARGET: &str = "inbox_pkce::security";

/// Provider authorization endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationEndpoint {
    authorize_url: String,
    client_id: String,
    redirect_uri: String,
    scope: Option<String>,
    extra_params: Vec<(String, String)>,
}

impl AuthorizationEndpoint {
    /// Creates an endpoint description.
    #[must_use]
    pub fn new(
        authorize_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authorize_url: authorize_url.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: None,
            extra_params: Vec::new(),
        }
    }

    /// Sets the `scope` value, already joined the way the provider expects.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Adds a provider-specific query parameter (e.g. `config_id`).
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    /// Returns the configured redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Builds the authorization URL for a started flow.
    #[must_use]
    pub fn authorization_url(&self, start: &FlowStart) -> String {
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", &self.client_id),
            ("redirect_uri", &self.redirect_uri),
        ];
        if let Some(scope) = &self.scope {
            params.push(("scope", scope));
        }
        params.push(("state", start.state()));
        params.push(("code_challenge", start.code_challenge().as_str()));
        params.push(("code_challenge_method", start.code_challenge_method()));
        for (key, value) in &self.extra_params {
            params.push((key, value));
        }

        let query = params
            .iter()
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&");

        let separator = if self.authorize_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.authorize_url, separator, query)
    }
}

/// Everything needed to send the user to the provider.
///
/// Only [`PkceFlow::begin`] creates one, and it does so after the record is
/// stored, so holding a `FlowStart` means the redirect is safe to perform.
#[derive(Debug, Clone)]
pub struct FlowStart {
    key: String,
    code_verifier: CodeVerifier,
    code_challenge: CodeChallenge,
    state: String,
    expires_at: u64,
}

impl FlowStart {
    /// Returns the flow key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the verifier. It stays local until the token exchange.
    #[must_use]
    pub fn code_verifier(&self) -> &CodeVerifier {
        &self.code_verifier
    }

    /// Returns the challenge for the authorization request.
    #[must_use]
    pub fn code_challenge(&self) -> &CodeChallenge {
        &self.code_challenge
    }

    /// Returns "S256".
    #[must_use]
    pub fn code_challenge_method(&self) -> &'static str {
        CHALLENGE_METHOD
    }

    /// Returns the state for the authorization request.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Returns when the stored record expires, in ms since the Unix epoch.
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }
}

/// A callback that passed every check.
#[derive(Debug, Clone)]
pub struct CompletedFlow {
    key: String,
    code: String,
    code_verifier: CodeVerifier,
    context: Option<FlowContext>,
}

impl CompletedFlow {
    /// Returns the flow key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the authorization code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the verifier to send with the token request.
    #[must_use]
    pub fn code_verifier(&self) -> &CodeVerifier {
        &self.code_verifier
    }

    /// Returns the wizard context saved at `begin`.
    #[must_use]
    pub fn context(&self) -> Option<&FlowContext> {
        self.context.as_ref()
    }
}

/// Drives PKCE flows on top of a [`ParameterStore`].
#[derive(Debug)]
pub struct PkceFlow {
    store: ParameterStore,
    verifier_bytes: usize,
}

impl PkceFlow {
    /// Creates a flow manager with 32-byte verifiers.
    #[must_use]
    pub fn new(store: ParameterStore) -> Self {
        Self {
            store,
            verifier_bytes: super::pkce::VERIFIER_DEFAULT_BYTES,
        }
    }

    /// Creates a flow manager and its store from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn from_config(
        storage: Arc<dyn SessionStorage>,
        config: &PkceConfig,
    ) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        Ok(Self {
            store: ParameterStore::from_config(storage, config),
            verifier_bytes: config.verifier_bytes,
        })
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Starts a flow under `key`, replacing any flow already there.
    ///
    /// The record is written before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS entropy source fails or the record
    /// cannot be stored. Either way, do not redirect.
    pub fn begin(&self, key: &str, context: FlowContext) -> Result<FlowStart, PkceError> {
        let code_verifier = generate_verifier_with_len(self.verifier_bytes)?;
        let code_challenge = code_verifier.challenge();
        let state = generate_state()?;

        let params = PkceParams::new(code_verifier.clone(), state.clone()).with_context(context);
        let record = self.store.store(key, &params)?;

        let integration = params.context.as_ref().map_or("", |c| c.integration.as_str());
        info!(key = %key, integration = %integration, "Started PKCE authorization flow");

        Ok(FlowStart {
            key: key.to_string(),
            code_verifier,
            code_challenge,
            state,
            expires_at: record.expires_at(),
        })
    }

    /// Validates a callback and returns the verifier for the token exchange.
    ///
    /// The record is left in place; call [`consume`](Self::consume) after
    /// the exchange, or use [`finish`](Self::finish).
    ///
    /// # Errors
    ///
    /// - [`FlowError::Expired`] if no live record exists
    /// - [`FlowError::StateMismatch`] if the state differs; the record is deleted
    /// - [`FlowError::MissingCode`] if `code` is empty; the record is deleted
    pub fn complete(
        &self,
        key: &str,
        code: &str,
        returned_state: &str,
    ) -> FlowResult<CompletedFlow> {
        let Some(record) = self.store.retrieve(key) else {
            info!(key = %key, "No valid PKCE record for callback; flow must restart");
            return Err(FlowError::expired(key));
        };

        if !states_match(record.state(), returned_state) {
            warn!(
                target: SECURITY_TARGET,
                key = %key,
                "Security: OAuth state mismatch - possible CSRF attempt, flow aborted"
            );
            self.store.delete(key);
            return Err(FlowError::state_mismatch(key));
        }

        if code.is_empty() {
            warn!(key = %key, "OAuth callback carried no authorization code");
            self.store.delete(key);
            return Err(FlowError::missing_code(key));
        }

        debug!(key = %key, "PKCE callback validated");
        let params = record.into_params();
        Ok(CompletedFlow {
            key: key.to_string(),
            code: code.to_string(),
            code_verifier: params.code_verifier,
            context: params.context,
        })
    }

    /// Runs [`complete`](Self::complete) on parsed callback parameters.
    ///
    /// A provider error (`error=access_denied`, ...) clears the record and
    /// yields [`FlowError::Denied`].
    ///
    /// # Errors
    ///
    /// See [`complete`](Self::complete).
    pub fn handle_callback(&self, key: &str, params: &CallbackParams) -> FlowResult<CompletedFlow> {
        if let Some(reason) = params.error_reason() {
            info!(key = %key, reason = %reason, "Authorization server returned an error");
            self.store.delete(key);
            return Err(FlowError::denied(key, reason));
        }
        self.complete(
            key,
            params.code.as_deref().unwrap_or_default(),
            params.state.as_deref().unwrap_or_default(),
        )
    }

    /// Completes the flow, runs the caller's token exchange, and consumes
    /// the record whatever the exchange outcome.
    ///
    /// Authorization codes are single-use, so a failed exchange cannot be
    /// retried with the same record.
    ///
    /// # Errors
    ///
    /// Any [`complete`](Self::complete) error, or [`FlowError::Exchange`]
    /// wrapping the closure's error.
    pub async fn finish<F, Fut, T>(
        &self,
        key: &str,
        code: &str,
        returned_state: &str,
        exchange: F,
    ) -> FlowResult<T>
    where
        F: FnOnce(String, CodeVerifier) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let completed = self.complete(key, code, returned_state)?;
        let result = exchange(completed.code, completed.code_verifier).await;
        self.store.delete(key);

        match result {
            Ok(value) => {
                info!(key = %key, "PKCE flow finished");
                Ok(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Token exchange failed");
                Err(FlowError::exchange(key, format!("{e:#}")))
            }
        }
    }

    /// Finds the flow a returned state belongs to and its wizard context.
    ///
    /// Used after a full-page redirect, when the wizard no longer knows
    /// which flow it was running. Does not consume the record.
    #[must_use]
    pub fn resume(&self, returned_state: &str) -> Option<(String, FlowContext)> {
        let (key, record) = self.store.find_by_state(returned_state)?;
        let context = record.context()?.clone();
        debug!(key = %key, "Resumed PKCE flow from callback state");
        Some((key, context))
    }

    /// Deletes the record after a successful exchange.
    pub fn consume(&self, key: &str) {
        self.store.delete(key);
    }

    /// Abandons the flow under `key`. Safe if none exists.
    pub fn cancel(&self, key: &str) {
        debug!(key = %key, "Cancelling PKCE flow");
        self.store.delete(key);
    }

    /// Abandons every flow (wizard closed or torn down).
    pub fn cancel_all(&self) -> usize {
        self.store.clear_all()
    }
}
