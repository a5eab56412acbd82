use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::header::AUTHORIZATION;
use tracing::debug;

use crate::RestlineResult;
use crate::context::RequestContext;
use crate::error::{BoxError, Error};
use crate::middleware::{Middleware, Next};
use crate::util::parse_header_value;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthenticationProviderOptions {
    pub scopes: Vec<String>,
}

impl AuthenticationProviderOptions {
    pub fn with_scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Supplies bearer tokens. Implementations own caching and refresh.
pub trait AuthenticationProvider: Send + Sync {
    fn access_token<'a>(
        &'a self,
        options: &'a AuthenticationProviderOptions,
    ) -> BoxFuture<'a, Result<String, BoxError>>;
}

#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AuthenticationProvider for StaticTokenProvider {
    fn access_token<'a>(
        &'a self,
        _options: &'a AuthenticationProviderOptions,
    ) -> BoxFuture<'a, Result<String, BoxError>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}

/// Per-call override of the provider or the scopes it is asked for.
#[derive(Clone, Default)]
pub struct AuthenticationHandlerOptions {
    provider: Option<Arc<dyn AuthenticationProvider>>,
    provider_options: AuthenticationProviderOptions,
}

impl std::fmt::Debug for AuthenticationHandlerOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AuthenticationHandlerOptions")
            .field("has_provider", &self.provider.is_some())
            .field("provider_options", &self.provider_options)
            .finish()
    }
}

impl AuthenticationHandlerOptions {
    pub fn with_provider(mut self, provider: Arc<dyn AuthenticationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_provider_options(mut self, provider_options: AuthenticationProviderOptions) -> Self {
        self.provider_options = provider_options;
        self
    }
}

/// Adds `Authorization: Bearer <token>` for trusted hosts and strips it for
/// every other host.
#[derive(Clone)]
pub struct AuthenticationHandler {
    provider: Arc<dyn AuthenticationProvider>,
    trusted_hosts: BTreeSet<String>,
}

impl std::fmt::Debug for AuthenticationHandler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AuthenticationHandler")
            .field("trusted_hosts", &self.trusted_hosts)
            .finish_non_exhaustive()
    }
}

impl AuthenticationHandler {
    pub fn new(provider: Arc<dyn AuthenticationProvider>) -> Self {
        Self {
            provider,
            trusted_hosts: BTreeSet::new(),
        }
    }

    pub fn trusted_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_hosts
            .extend(hosts.into_iter().map(|host| host.into().to_ascii_lowercase()));
        self
    }

    fn is_trusted(&self, context: &RequestContext) -> bool {
        let Some(host) = context.uri().host() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.trusted_hosts.contains(&host) || context.custom_hosts().contains(&host)
    }
}

impl Middleware for AuthenticationHandler {
    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RestlineResult<()>> {
        Box::pin(async move {
            if self.is_trusted(context) {
                let overrides = context.control().authentication().cloned().unwrap_or_default();
                let provider = overrides.provider.unwrap_or_else(|| Arc::clone(&self.provider));
                let token = provider
                    .access_token(&overrides.provider_options)
                    .await
                    .map_err(|source| Error::Authentication { source })?;
                let value = parse_header_value(AUTHORIZATION.as_str(), &format!("Bearer {token}"))?;
                context.headers_mut().insert(AUTHORIZATION, value);
            } else if context.headers_mut().remove(AUTHORIZATION).is_some() {
                debug!(
                    host = context.uri().host().unwrap_or_default(),
                    "removed authorization header for untrusted host"
                );
            }
            next.run(context).await
        })
    }
}
