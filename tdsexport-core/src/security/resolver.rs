//! Credential resolution.
//!
//! A [`CredentialResolver`] turns a target (server + database) into a
//! [`ConnectionDescriptor`]. The concrete resolver is chosen once at startup
//! by [`select_resolver`]; nothing downstream branches on the platform.
//!
//! - Windows defaults to [`IntegratedResolver`] (current Windows identity).
//! - Everything else defaults to [`InteractiveResolver`] (SQL login, prompting
//!   on the terminal for whatever was not supplied).
//! - [`AccessTokenResolver`] is available on request on every platform.

use super::connection::{Authentication, ConnectionDescriptor, ServerAddress};
use super::credentials::Credentials;
use crate::error::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::debug;
use zeroize::Zeroizing;

/// Produces a validated connection descriptor or an auth error.
pub trait CredentialResolver {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Resolves credentials for the target.
    ///
    /// # Errors
    /// Returns [`ExportError::Auth`] when credentials are missing, empty, or
    /// the prompt could not be read.
    fn resolve(&self) -> Result<ConnectionDescriptor>;
}

/// Server and database a resolver authenticates against.
#[derive(Debug, Clone)]
pub struct ResolverTarget {
    pub server: ServerAddress,
    pub database: String,
}

/// Requested authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthPreference {
    /// Pick by platform
    #[default]
    Auto,
    Integrated,
    #[serde(alias = "sql")]
    SqlLogin,
    #[serde(alias = "aad-token")]
    AccessToken,
}

/// Host platform families that select different default flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Other,
}

impl Platform {
    /// Platform of the running binary.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Other,
        }
    }
}

/// Secrets and identities collected from the command line or environment.
#[derive(Default)]
pub struct ResolverInputs {
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub access_token: Option<Zeroizing<String>>,
    /// Allow terminal prompts for missing values
    pub interactive: bool,
}

/// Uses the identity of the logged-in Windows user.
#[derive(Debug)]
pub struct IntegratedResolver {
    target: ResolverTarget,
}

impl IntegratedResolver {
    pub fn new(target: ResolverTarget) -> Self {
        Self { target }
    }
}

impl CredentialResolver for IntegratedResolver {
    fn name(&self) -> &'static str {
        "integrated"
    }

    fn resolve(&self) -> Result<ConnectionDescriptor> {
        ConnectionDescriptor::new(
            self.target.server.clone(),
            self.target.database.clone(),
            Authentication::Integrated,
        )
        .map_err(|e| ExportError::auth(e.to_string()))
    }
}

/// SQL login; prompts for any missing username or password.
pub struct InteractiveResolver {
    target: ResolverTarget,
    username: Option<String>,
    password: Option<Zeroizing<String>>,
    interactive: bool,
}

impl InteractiveResolver {
    pub fn new(target: ResolverTarget, inputs: ResolverInputs) -> Self {
        Self {
            target,
            username: inputs.username,
            password: inputs.password,
            interactive: inputs.interactive,
        }
    }

    fn username(&self) -> Result<String> {
        if let Some(username) = &self.username {
            return Ok(username.clone());
        }
        if !self.interactive {
            return Err(ExportError::auth(
                "no username supplied and interactive prompts are disabled",
            ));
        }

        print!("Username for {}: ", self.target.server);
        std::io::stdout()
            .flush()
            .map_err(|e| ExportError::auth(format!("Failed to flush prompt: {}", e)))?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ExportError::auth(format!("Failed to read username: {}", e)))?;
        Ok(line.trim().to_string())
    }

    fn password(&self, username: &str) -> Result<Zeroizing<String>> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if !self.interactive {
            return Err(ExportError::auth(
                "no password supplied and interactive prompts are disabled",
            ));
        }

        let prompt = format!("Password for {}@{}: ", username, self.target.server);
        rpassword::prompt_password(prompt)
            .map(Zeroizing::new)
            .map_err(|e| ExportError::auth(format!("Failed to read password: {}", e)))
    }
}

impl CredentialResolver for InteractiveResolver {
    fn name(&self) -> &'static str {
        "interactive"
    }

    fn resolve(&self) -> Result<ConnectionDescriptor> {
        let username = self.username()?;
        if username.is_empty() {
            return Err(ExportError::auth("username cannot be empty"));
        }

        let password = self.password(&username)?;
        if password.is_empty() {
            return Err(ExportError::auth("password cannot be empty"));
        }

        debug!("Resolved SQL login for user '{}'", username);
        let credentials = Credentials::new(username, Some(password.to_string()));
        ConnectionDescriptor::new(
            self.target.server.clone(),
            self.target.database.clone(),
            Authentication::SqlLogin(credentials),
        )
        .map_err(|e| ExportError::auth(e.to_string()))
    }
}

/// Azure AD access token supplied out of band.
pub struct AccessTokenResolver {
    target: ResolverTarget,
    token: Option<Zeroizing<String>>,
}

impl AccessTokenResolver {
    pub fn new(target: ResolverTarget, token: Option<Zeroizing<String>>) -> Self {
        Self { target, token }
    }
}

impl CredentialResolver for AccessTokenResolver {
    fn name(&self) -> &'static str {
        "access-token"
    }

    fn resolve(&self) -> Result<ConnectionDescriptor> {
        let token = self
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ExportError::auth("no access token supplied"))?;

        ConnectionDescriptor::new(
            self.target.server.clone(),
            self.target.database.clone(),
            Authentication::AccessToken(token),
        )
        .map_err(|e| ExportError::auth(e.to_string()))
    }
}

/// Chooses the resolver for the running platform.
pub fn select_resolver(
    preference: AuthPreference,
    target: ResolverTarget,
    inputs: ResolverInputs,
) -> Box<dyn CredentialResolver> {
    select_resolver_for(Platform::current(), preference, target, inputs)
}

/// Chooses the resolver for an explicit platform.
pub fn select_resolver_for(
    platform: Platform,
    preference: AuthPreference,
    target: ResolverTarget,
    inputs: ResolverInputs,
) -> Box<dyn CredentialResolver> {
    let effective = match (preference, platform) {
        (AuthPreference::Auto, Platform::Windows) => AuthPreference::Integrated,
        (AuthPreference::Auto, Platform::MacOs | Platform::Other) => AuthPreference::SqlLogin,
        (explicit, _) => explicit,
    };

    match effective {
        AuthPreference::Integrated => Box::new(IntegratedResolver::new(target)),
        AuthPreference::AccessToken => {
            Box::new(AccessTokenResolver::new(target, inputs.access_token))
        }
        AuthPreference::SqlLogin | AuthPreference::Auto => {
            Box::new(InteractiveResolver::new(target, inputs))
        }
    }
}
