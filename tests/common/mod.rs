//! Shared wiring for the integration suites: a fully assembled in-memory
//! stack plus seeding helpers.

#![allow(dead_code)]

use std::sync::Arc;
use uuid::Uuid;

use custos::audit::MemoryAuditSink;
use custos::auth::AuthenticationService;
use custos::config::AuthConfig;
use custos::mfa::MfaEngine;
use custos::password::{hash_password, PasswordPolicy};
use custos::rate_limit::{NoopRateLimiter, RateLimiter};
use custos::session::SessionStore;
use custos::store::memory::{
    MemoryKeyValueStore, MemorySessionRepo, MemorySmsSender, MemoryUserStore,
};
use custos::store::User;

pub const PASSWORD: &str = "Vk9#mQ2$wXp7Lf";

pub struct TestEnv {
    pub service: AuthenticationService,
    pub sessions: Arc<SessionStore>,
    pub mfa: Arc<MfaEngine>,
    pub users: Arc<MemoryUserStore>,
    pub kv: Arc<MemoryKeyValueStore>,
    pub session_repo: Arc<MemorySessionRepo>,
    pub sms: Arc<MemorySmsSender>,
    pub audit: Arc<MemoryAuditSink>,
}

/// Capture `tracing` output (the audit sink's default target included) in
/// the test harness. Only the first caller installs the subscriber.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

pub fn env() -> TestEnv {
    env_with(AuthConfig::new(), Arc::new(NoopRateLimiter))
}

pub fn env_with(config: AuthConfig, limiter: Arc<dyn RateLimiter>) -> TestEnv {
    init_tracing();
    let users = Arc::new(MemoryUserStore::new());
    let kv = Arc::new(MemoryKeyValueStore::new());
    let session_repo = Arc::new(MemorySessionRepo::new());
    let sms = Arc::new(MemorySmsSender::new());
    let audit = Arc::new(MemoryAuditSink::new());

    let sessions = Arc::new(SessionStore::new(
        session_repo.clone(),
        users.clone(),
        kv.clone(),
        audit.clone(),
        &config,
    ));
    let mfa = Arc::new(MfaEngine::new(
        users.clone(),
        kv.clone(),
        sms.clone(),
        audit.clone(),
        &config,
    ));
    let passwords = PasswordPolicy::new(users.clone(), &config);
    let service = AuthenticationService::new(
        users.clone(),
        kv.clone(),
        sessions.clone(),
        passwords,
        mfa.clone(),
        limiter,
        audit.clone(),
        config,
    );

    TestEnv {
        service,
        sessions,
        mfa,
        users,
        kv,
        session_repo,
        sms,
        audit,
    }
}

/// Seed an active user whose password is `PASSWORD`.
pub async fn seed_user(env: &TestEnv, email: &str) -> Uuid {
    let mut user = User::new(email, &hash_password(PASSWORD).unwrap());
    user.first_name = "Jordan".to_string();
    user.last_name = "Reyes".to_string();
    let id = user.id;
    env.users.insert(user).await;
    id
}

/// Current TOTP code for a base32 seed, mirroring an authenticator app.
pub fn totp_code(secret_base32: &str) -> String {
    let bytes = totp_rs::Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .unwrap();
    totp_rs::TOTP::new(totp_rs::Algorithm::SHA1, 6, 1, 30, bytes, None, "user".to_string())
        .unwrap()
        .generate_current()
        .unwrap()
}

/// Pull the six-digit code out of a recorded SMS body.
pub fn sms_code(body: &str) -> String {
    body.chars().filter(char::is_ascii_digit).take(6).collect()
}
