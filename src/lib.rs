//! vmgate Library
//!
//! Bearer-token authorization gateway for virtual machine lifecycle operations.
//!
//! # Features
//!
//! - **OIDC Discovery**: issuer metadata and signing keys fetched once at startup
//! - **Token Verification**: signature, lifetime, issuer and audience checks
//! - **Tolerant Claims**: malformed role claims degrade to an empty role set
//! - **Role Policy**: flat role membership per operation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmgate::auth::{discovery, ClaimExtractor, TokenVerifier};
//! use vmgate::authz::AccessPolicy;
//! use vmgate::gate::RequestGate;
//! use vmgate::platform::InMemoryPlatform;
//! use vmgate::server::{AppState, Server};
//! use vmgate::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let client = discovery::http_client(config.oidc.discovery_timeout())?;
//!     let metadata =
//!         discovery::discover(&client, &config.oidc.issuer_url, &config.oidc.client_id).await?;
//!
//!     let state = AppState {
//!         gate: RequestGate::new(
//!             Arc::new(TokenVerifier::new(metadata)),
//!             ClaimExtractor::new(&config.oidc.roles_claim),
//!         ),
//!         policy: AccessPolicy::from_config(&config.policy),
//!         platform: Arc::new(InMemoryPlatform::with_templates(config.platform.templates.clone())),
//!     };
//!     Server::bind(&config.server.address, state).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod authz;
pub mod config;
pub mod gate;
pub mod metrics;
pub mod platform;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use gate::{GateFailure, RequestGate};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
