//! Connect parameter resolution
//!
//! Username, password and connect descriptor are resolved from up to four
//! sources. For each field the first source that has a value wins:
//!
//! 1. an explicit value set on [`ConnectParams`]
//! 2. an environment-style override looked up through [`ParamResolver`]
//! 3. an interactive [`CredentialPrompt`]
//! 4. the resolver's defaults

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Credentials, Result};

/// Environment key for the username override
pub const ENV_USER: &str = "SESSIONPOOL_USER";
/// Environment key for the password override
pub const ENV_PASSWORD: &str = "SESSIONPOOL_PASSWORD";
/// Environment key for the connect descriptor override
pub const ENV_DSN: &str = "SESSIONPOOL_DSN";

/// Explicitly supplied connect parameters
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub user: Option<String>,
    pub password: Option<String>,
    pub dsn: Option<String>,
}

impl ConnectParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    /// Both user and password, if both are present
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dsn", &self.dsn)
            .finish()
    }
}

/// Asks a human for a missing value
pub trait CredentialPrompt: Send + Sync {
    /// Prompt for `field` ("user", "password" or "dsn"). Returning `Ok(None)`
    /// means the prompt was declined and resolution falls through to the
    /// defaults.
    fn prompt(&self, field: &str) -> Result<Option<String>>;
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves [`ConnectParams`] against overrides, a prompt and defaults
#[derive(Clone)]
pub struct ParamResolver {
    env: EnvLookup,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    defaults: ConnectParams,
}

impl ParamResolver {
    /// A resolver that reads overrides from the process environment
    pub fn from_env() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }

    /// A resolver with a custom override lookup
    pub fn with_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            env: Arc::new(lookup),
            prompt: None,
            defaults: ConnectParams::default(),
        }
    }

    /// A resolver whose overrides come from a fixed map
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        Self::with_env(move |key| overrides.get(key).cloned())
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_defaults(mut self, defaults: ConnectParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// Fill every missing field of `explicit` from the lower-precedence
    /// sources
    pub fn resolve(&self, explicit: &ConnectParams) -> Result<ConnectParams> {
        let user = self.resolve_field("user", ENV_USER, &explicit.user, &self.defaults.user)?;
        let password = self.resolve_field(
            "password",
            ENV_PASSWORD,
            &explicit.password,
            &self.defaults.password,
        )?;
        let dsn = self.resolve_field("dsn", ENV_DSN, &explicit.dsn, &self.defaults.dsn)?;

        tracing::debug!(
            user = ?user,
            has_password = password.is_some(),
            dsn = ?dsn,
            "resolved connect parameters"
        );
        Ok(ConnectParams { user, password, dsn })
    }

    fn resolve_field(
        &self,
        field: &str,
        env_key: &str,
        explicit: &Option<String>,
        default: &Option<String>,
    ) -> Result<Option<String>> {
        if let Some(value) = explicit {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = (self.env)(env_key).filter(|v| !v.is_empty()) {
            return Ok(Some(value));
        }
        if let Some(prompt) = &self.prompt
            && let Some(value) = prompt.prompt(field)?
        {
            return Ok(Some(value));
        }
        Ok(default.clone())
    }
}

impl Default for ParamResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

impl std::fmt::Debug for ParamResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamResolver")
            .field("has_prompt", &self.prompt.is_some())
            .field("defaults", &self.defaults)
            .finish()
    }
}
