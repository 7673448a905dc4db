use crate::webauthn::{
    config::SubjectClass,
    error::{ChallengeError, Error},
    proto::constants::WEBAUTHN_CHALLENGE_LENGTH,
    store::{ChallengeRecord, ChallengeStore},
};
use ring::rand::{SecureRandom, SystemRandom};
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Diagnostic data recorded with a challenge. Never used for decisions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChallengeMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// 32 random bytes, base64url.
pub fn generate_challenge() -> Result<String, Error> {
    let mut bytes = [0u8; WEBAUTHN_CHALLENGE_LENGTH];
    SystemRandom::new().fill(&mut bytes)?;
    Ok(crate::base64::encode_urlsafe(bytes))
}

pub struct ChallengeManager<C> {
    store: C,
    ttl: Duration,
}

impl<C: ChallengeStore> ChallengeManager<C> {
    pub fn new(store: C, ttl: Duration) -> Self {
        ChallengeManager { store, ttl }
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn create_challenge(&self, subject_id: Option<&str>, class: SubjectClass, metadata: ChallengeMetadata) -> Result<String, Error> {
        let now = OffsetDateTime::now_utc();

        // Hygiene only, a failure here must not block the ceremony.
        match self.store.delete_expired_or_used(now) {
            Ok(0) => {}
            Ok(deleted) => debug!(deleted, "purged stale challenges"),
            Err(e) => debug!(error = %e, "failed to purge stale challenges"),
        }

        let value = generate_challenge()?;
        self.store.create(ChallengeRecord {
            value: value.clone(),
            subject_id: subject_id.map(str::to_string),
            subject_class: class,
            created_at: now,
            expires_at: now + self.ttl,
            consumed_at: None,
            ip_address: metadata.ip_address,
            user_agent: metadata.user_agent,
        })?;

        debug!(subject_class = %class, has_subject = subject_id.is_some(), "issued challenge");
        Ok(value)
    }

    pub fn consume_challenge(&self, subject_id: Option<&str>, class: SubjectClass) -> Result<String, Error> {
        let record = self.store.consume(subject_id, class, OffsetDateTime::now_utc())?.ok_or_else(|| {
            debug!(subject_class = %class, has_subject = subject_id.is_some(), "no live challenge to consume");
            ChallengeError::NotFound
        })?;

        debug!(subject_class = %class, "consumed challenge");
        Ok(record.value)
    }

    /// Same shape as an issued challenge, never persisted, so it can never be consumed.
    pub fn dummy_challenge(&self) -> Result<String, Error> {
        generate_challenge()
    }
}
