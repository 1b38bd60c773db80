//! SMS challenge codes and the MFA verification lockout counter.
//!
//! Both live in the shared key/value store rather than process memory so any
//! instance behind the load balancer can verify a code issued by another.
//! Records are JSON with their own embedded expiry in addition to the store
//! TTL; the embedded timestamp is authoritative.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{KeyValueStore, SmsSender};

pub(crate) fn challenge_key(user_id: Uuid) -> String {
    format!("mfa:sms:{user_id}")
}

pub(crate) fn lockout_key(user_id: Uuid) -> String {
    format!("mfa:lockout:{user_id}")
}

/// Zero-padded six-digit code.
#[must_use]
pub fn generate_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

/// A pending SMS challenge for one user. At most one exists at a time;
/// requesting a new code replaces the old one.
#[derive(Debug, Serialize, Deserialize)]
struct SmsChallenge {
    code: String,
    expires_at: DateTime<Utc>,
    attempts: u32,
}

/// Outcome of checking a submitted SMS code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmsVerification {
    Valid,
    /// Wrong code; the challenge survives until attempts run out.
    Mismatch,
    /// No pending challenge, an expired one, or attempts exhausted.
    Unavailable,
}

/// Issues and checks SMS codes over the shared key/value store.
pub struct SmsCodes {
    kv: Arc<dyn KeyValueStore>,
    sender: Arc<dyn SmsSender>,
    code_ttl: Duration,
    max_attempts: u32,
}

impl SmsCodes {
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        sender: Arc<dyn SmsSender>,
        code_ttl: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            kv,
            sender,
            code_ttl,
            max_attempts,
        }
    }

    /// Generate a fresh code, deliver it, and persist the challenge. The
    /// challenge is only stored once the provider confirms delivery, so a
    /// rejected send leaves nothing to verify against.
    pub async fn send(&self, user_id: Uuid, phone: &str) -> Result<()> {
        let code = generate_code();
        let body = format!("Your verification code is {code}. It expires in 5 minutes.");
        let delivered = self
            .sender
            .send(phone, &body)
            .await
            .context("failed to deliver SMS code")?;
        if !delivered {
            anyhow::bail!("SMS provider rejected delivery");
        }
        let challenge = SmsChallenge {
            code,
            expires_at: Utc::now() + self.code_ttl,
            attempts: 0,
        };
        self.store_challenge(user_id, &challenge).await
    }

    /// Check a submitted code. A match consumes the challenge; a mismatch
    /// counts against the attempt budget and the last allowed mismatch
    /// invalidates the code entirely.
    pub async fn verify(&self, user_id: Uuid, submitted: &str) -> Result<SmsVerification> {
        let key = challenge_key(user_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(SmsVerification::Unavailable);
        };
        let mut challenge: SmsChallenge =
            serde_json::from_str(&raw).context("corrupt SMS challenge record")?;

        if challenge.expires_at <= Utc::now() {
            self.kv.delete(&key).await?;
            return Ok(SmsVerification::Unavailable);
        }

        if challenge.code == submitted {
            self.kv.delete(&key).await?;
            return Ok(SmsVerification::Valid);
        }

        challenge.attempts += 1;
        if challenge.attempts >= self.max_attempts {
            self.kv.delete(&key).await?;
            return Ok(SmsVerification::Unavailable);
        }
        self.store_challenge(user_id, &challenge).await?;
        Ok(SmsVerification::Mismatch)
    }

    async fn store_challenge(&self, user_id: Uuid, challenge: &SmsChallenge) -> Result<()> {
        let ttl = self
            .code_ttl
            .to_std()
            .context("non-positive SMS code TTL")?;
        let raw = serde_json::to_string(challenge).context("failed to encode SMS challenge")?;
        self.kv.set(&challenge_key(user_id), raw, ttl).await
    }
}

/// Failure counter behind MFA verification. Separate from the login lockout:
/// a stolen password plus MFA guessing must not let an attacker lock the
/// legitimate user out of password login.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LockoutRecord {
    failures: u32,
    locked_until: Option<DateTime<Utc>>,
}

pub struct VerifyLockout {
    kv: Arc<dyn KeyValueStore>,
    threshold: u32,
    duration: Duration,
}

impl VerifyLockout {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, threshold: u32, duration: Duration) -> Self {
        Self {
            kv,
            threshold,
            duration,
        }
    }

    /// Minutes remaining if the user is locked out of MFA verification,
    /// rounded up. Callers check this before evaluating any code.
    pub async fn minutes_remaining(&self, user_id: Uuid) -> Result<Option<i64>> {
        let record = self.load(user_id).await?;
        let Some(locked_until) = record.locked_until else {
            return Ok(None);
        };
        let now = Utc::now();
        if locked_until <= now {
            self.kv.delete(&lockout_key(user_id)).await?;
            return Ok(None);
        }
        let millis = (locked_until - now).num_milliseconds();
        Ok(Some((millis + 59_999) / 60_000))
    }

    /// Count one failed verification; the threshold failure starts the lock.
    pub async fn record_failure(&self, user_id: Uuid) -> Result<()> {
        let mut record = self.load(user_id).await?;
        record.failures += 1;
        if record.failures >= self.threshold {
            record.locked_until = Some(Utc::now() + self.duration);
        }
        let ttl = self
            .duration
            .to_std()
            .context("non-positive verification lockout duration")?;
        let raw = serde_json::to_string(&record).context("failed to encode lockout record")?;
        self.kv.set(&lockout_key(user_id), raw, ttl).await
    }

    /// A successful verification clears the counter.
    pub async fn clear(&self, user_id: Uuid) -> Result<()> {
        self.kv.delete(&lockout_key(user_id)).await
    }

    async fn load(&self, user_id: Uuid) -> Result<LockoutRecord> {
        match self.kv.get(&lockout_key(user_id)).await? {
            Some(raw) => serde_json::from_str(&raw).context("corrupt lockout record"),
            None => Ok(LockoutRecord::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SmsCodes, SmsVerification, VerifyLockout};
    use crate::store::memory::{MemoryKeyValueStore, MemorySmsSender};
    use crate::store::SmsSender;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Arc;
    use uuid::Uuid;

    struct RejectingSmsSender;

    #[async_trait]
    impl SmsSender for RejectingSmsSender {
        async fn send(&self, _to_number: &str, _body: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    fn codes(sender: Arc<MemorySmsSender>) -> SmsCodes {
        SmsCodes::new(
            Arc::new(MemoryKeyValueStore::new()),
            sender,
            Duration::minutes(5),
            3,
        )
    }

    fn extract_code(body: &str) -> String {
        body.chars().filter(char::is_ascii_digit).take(6).collect()
    }

    #[tokio::test]
    async fn sent_code_verifies_once() {
        let sender = Arc::new(MemorySmsSender::new());
        let codes = codes(sender.clone());
        let user_id = Uuid::new_v4();

        codes.send(user_id, "+15555550100").await.unwrap();
        let sent = sender.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+15555550100");
        let code = extract_code(&sent[0].1);

        assert_eq!(
            codes.verify(user_id, &code).await.unwrap(),
            SmsVerification::Valid
        );
        // Consumed; the same code is no longer accepted.
        assert_eq!(
            codes.verify(user_id, &code).await.unwrap(),
            SmsVerification::Unavailable
        );
    }

    #[tokio::test]
    async fn three_mismatches_invalidate_the_code() {
        let sender = Arc::new(MemorySmsSender::new());
        let codes = codes(sender.clone());
        let user_id = Uuid::new_v4();

        codes.send(user_id, "+15555550100").await.unwrap();
        let real_code = extract_code(&sender.sent().await[0].1);
        let wrong = if real_code == "000000" { "000001" } else { "000000" };

        assert_eq!(
            codes.verify(user_id, wrong).await.unwrap(),
            SmsVerification::Mismatch
        );
        assert_eq!(
            codes.verify(user_id, wrong).await.unwrap(),
            SmsVerification::Mismatch
        );
        // Third mismatch burns the challenge.
        assert_eq!(
            codes.verify(user_id, wrong).await.unwrap(),
            SmsVerification::Unavailable
        );
        // Even the real code is now rejected.
        assert_eq!(
            codes.verify(user_id, &real_code).await.unwrap(),
            SmsVerification::Unavailable
        );
    }

    #[tokio::test]
    async fn rejected_delivery_fails_and_stores_nothing() {
        let codes = SmsCodes::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(RejectingSmsSender),
            Duration::minutes(5),
            3,
        );
        let user_id = Uuid::new_v4();

        assert!(codes.send(user_id, "+15555550100").await.is_err());
        // No challenge was persisted, so there is nothing to guess against.
        assert_eq!(
            codes.verify(user_id, "000000").await.unwrap(),
            SmsVerification::Unavailable
        );
    }

    #[tokio::test]
    async fn requesting_a_new_code_replaces_the_old() {
        let sender = Arc::new(MemorySmsSender::new());
        let codes = codes(sender.clone());
        let user_id = Uuid::new_v4();

        codes.send(user_id, "+15555550100").await.unwrap();
        codes.send(user_id, "+15555550100").await.unwrap();
        let sent = sender.sent().await;
        let first = extract_code(&sent[0].1);
        let second = extract_code(&sent[1].1);

        if first != second {
            assert_eq!(
                codes.verify(user_id, &first).await.unwrap(),
                SmsVerification::Mismatch
            );
        }
        assert_eq!(
            codes.verify(user_id, &second).await.unwrap(),
            SmsVerification::Valid
        );
    }

    #[tokio::test]
    async fn lockout_engages_at_threshold_and_clears() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let lockout = VerifyLockout::new(kv, 5, Duration::minutes(15));
        let user_id = Uuid::new_v4();

        for _ in 0..4 {
            lockout.record_failure(user_id).await.unwrap();
            assert_eq!(lockout.minutes_remaining(user_id).await.unwrap(), None);
        }
        lockout.record_failure(user_id).await.unwrap();
        let remaining = lockout.minutes_remaining(user_id).await.unwrap();
        assert_eq!(remaining, Some(15));

        lockout.clear(user_id).await.unwrap();
        assert_eq!(lockout.minutes_remaining(user_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sub_minute_lock_still_reads_one_minute() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let lockout = VerifyLockout::new(kv, 1, Duration::seconds(30));
        let user_id = Uuid::new_v4();

        lockout.record_failure(user_id).await.unwrap();
        // Thirty seconds left must round up, never down to zero.
        assert_eq!(lockout.minutes_remaining(user_id).await.unwrap(), Some(1));
    }
}
