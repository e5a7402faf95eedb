//! Credential handling and connection targets.
//!
//! - `credentials`: SQL login container with automatic memory zeroing
//! - `connection`: server address parsing and the immutable descriptor
//! - `resolver`: platform-selected credential resolution flows
//!
//! # Security Guarantees
//! - Secrets are stored in `Zeroizing` containers
//! - `Debug`/`Display` output of every type here is free of secrets

mod connection;
mod credentials;
mod resolver;

pub use connection::{
    Authentication, ConnectionDescriptor, DEFAULT_PORT, ParsedConnectionUrl, ServerAddress,
    parse_connection_url,
};
pub use credentials::Credentials;
pub use resolver::{
    AccessTokenResolver, AuthPreference, CredentialResolver, IntegratedResolver,
    InteractiveResolver, Platform, ResolverInputs, ResolverTarget, select_resolver,
    select_resolver_for,
};
