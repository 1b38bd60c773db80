//! Authentication core for a clinical records platform: password policy,
//! account lockout, MFA, and session lifecycle.
//!
//! The crate is the state machine only. HTTP surfaces, user provisioning,
//! and at-rest encryption live in the host application; everything here
//! talks to storage through the traits in [`store`], so deployments choose
//! between the in-memory backends and the Postgres ones (or their own).
//!
//! A typical assembly:
//!
//! ```no_run
//! use std::sync::Arc;
//! use custos::audit::TracingAuditSink;
//! use custos::auth::AuthenticationService;
//! use custos::config::AuthConfig;
//! use custos::mfa::MfaEngine;
//! use custos::password::PasswordPolicy;
//! use custos::rate_limit::NoopRateLimiter;
//! use custos::session::SessionStore;
//! use custos::store::memory::{
//!     MemoryKeyValueStore, MemorySessionRepo, MemorySmsSender, MemoryUserStore,
//! };
//!
//! let config = AuthConfig::new();
//! let users = Arc::new(MemoryUserStore::new());
//! let kv = Arc::new(MemoryKeyValueStore::new());
//! let audit = Arc::new(TracingAuditSink);
//! let sessions = Arc::new(SessionStore::new(
//!     Arc::new(MemorySessionRepo::new()),
//!     users.clone(),
//!     kv.clone(),
//!     audit.clone(),
//!     &config,
//! ));
//! let mfa = Arc::new(MfaEngine::new(
//!     users.clone(),
//!     kv.clone(),
//!     Arc::new(MemorySmsSender::new()),
//!     audit.clone(),
//!     &config,
//! ));
//! let passwords = PasswordPolicy::new(users.clone(), &config);
//! let service = AuthenticationService::new(
//!     users, kv, sessions, passwords, mfa,
//!     Arc::new(NoopRateLimiter), audit, config,
//! );
//! ```

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod mfa;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod token;

pub use auth::{AuthenticationService, LoginResult, SafeUser};
pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use mfa::{MfaEngine, MfaEnrollment, MfaStatus};
pub use password::PasswordPolicy;
pub use session::{SessionHandle, SessionStore};
