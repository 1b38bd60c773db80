//! Password policy behavior through the service: expiration gates, history
//! rotation, and combined validation errors.

mod common;

use chrono::{Duration, Utc};
use common::{env, seed_user, PASSWORD};
use custos::config::AuthConfig;
use custos::store::UserStore;
use custos::error::AuthError;
use custos::password::PasswordPolicy;
use custos::store::memory::MemoryUserStore;
use custos::store::UserUpdate;
use std::sync::Arc;

#[tokio::test]
async fn ninety_days_is_valid_ninety_one_is_not() {
    let env = env();
    let id = seed_user(&env, "jordan@clinic.example").await;

    // A minute short of the full 90 days: still inside the window.
    env.users
        .update(
            id,
            UserUpdate {
                password_changed_at: Some(Utc::now() - Duration::days(90) + Duration::minutes(1)),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();
    let result = env
        .service
        .login("jordan@clinic.example", PASSWORD, None, None)
        .await
        .unwrap();
    assert!(result.session.is_some());
    assert!(result.password_expiring_soon);
    assert_eq!(result.days_until_expiration, 1);

    env.users
        .update(
            id,
            UserUpdate {
                password_changed_at: Some(Utc::now() - Duration::days(91)),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();
    let result = env
        .service
        .login("jordan@clinic.example", PASSWORD, None, None)
        .await;
    assert!(matches!(result, Err(AuthError::PasswordExpired)));
}

#[tokio::test]
async fn exactly_seven_days_out_is_not_yet_a_warning() {
    let env = env();
    let id = seed_user(&env, "jordan@clinic.example").await;
    env.users
        .update(
            id,
            UserUpdate {
                password_changed_at: Some(Utc::now() - Duration::days(83)),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();

    let result = env
        .service
        .login("jordan@clinic.example", PASSWORD, None, None)
        .await
        .unwrap();
    assert!(!result.password_expiring_soon);
    assert_eq!(result.days_until_expiration, 7);
}

#[tokio::test]
async fn changing_resets_the_expiry_clock() {
    let env = env();
    let id = seed_user(&env, "jordan@clinic.example").await;
    env.users
        .update(
            id,
            UserUpdate {
                password_changed_at: Some(Utc::now() - Duration::days(89)),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();

    env.service
        .change_password(id, PASSWORD, "Nw8$rT3&yUe5Km")
        .await
        .unwrap();
    let result = env
        .service
        .login("jordan@clinic.example", "Nw8$rT3&yUe5Km", None, None)
        .await
        .unwrap();
    assert!(!result.password_expiring_soon);
    assert_eq!(result.days_until_expiration, 90);
}

#[tokio::test]
async fn history_holds_the_last_ten_passwords() {
    let env = env();
    let id = seed_user(&env, "jordan@clinic.example").await;

    // Rotate through eleven distinct passwords.
    let mut current = PASSWORD.to_string();
    for index in 0..11 {
        let next = format!("Rt7$kW{index}qZx#Pm2v");
        env.service
            .change_password(id, &current, &next)
            .await
            .unwrap();
        current = next;
    }

    // The original password has aged out of the ten-entry window.
    let user = env.users.get(id).await.unwrap();
    assert_eq!(user.password_history.len(), 10);
    env.service
        .change_password(id, &current, PASSWORD)
        .await
        .unwrap();
}

#[tokio::test]
async fn recent_password_cannot_come_back() {
    let env = env();
    let id = seed_user(&env, "jordan@clinic.example").await;

    env.service
        .change_password(id, PASSWORD, "Nw8$rT3&yUe5Km")
        .await
        .unwrap();
    let result = env
        .service
        .change_password(id, "Nw8$rT3&yUe5Km", PASSWORD)
        .await;
    assert!(matches!(result, Err(AuthError::PasswordReuse)));
}

#[tokio::test]
async fn user_info_is_rejected_in_new_passwords() {
    let env = env();
    let id = seed_user(&env, "jordan@clinic.example").await;

    // Seeded users are named Jordan Reyes.
    let result = env
        .service
        .change_password(id, PASSWORD, "Jordan9$xKw2Pm")
        .await;
    match result {
        Err(AuthError::ValidationFailure { errors }) => {
            assert!(errors.iter().any(|error| error.contains("name or email")));
        }
        other => panic!("expected ValidationFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn strength_scoring_is_deterministic() {
    let users = Arc::new(MemoryUserStore::new());
    let policy = PasswordPolicy::new(users, &AuthConfig::new());

    // 14 chars: 20 + 4 length bonus, all four classes, no penalties.
    let report = policy.validate_strength("Vk9#mQ2$wXp7Lf", None);
    assert!(report.is_valid);
    assert_eq!(report.score, 84);

    // Same password twice scores the same.
    let again = policy.validate_strength("Vk9#mQ2$wXp7Lf", None);
    assert_eq!(report.score, again.score);
}
