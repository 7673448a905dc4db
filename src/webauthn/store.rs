//! Persistence contract consumed by the engine, with in-process implementations.
//!
//! Single use of a challenge rests on [`ChallengeStore::mark_consumed`] being a
//! conditional update: it must only succeed for a row that is still unconsumed and
//! unexpired, and report whether it did.

use crate::webauthn::{config::SubjectClass, error::Error};
use std::sync::{Mutex, MutexGuard, RwLock};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeRecord {
    /// Base64url encoded random payload, also the record key.
    pub value: String,
    /// `None` for ceremonies started without a resolved subject.
    pub subject_id: Option<String>,
    pub subject_class: SubjectClass,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ChallengeRecord {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.consumed_at.is_none() && now < self.expires_at
    }

    fn matches(&self, subject_id: Option<&str>, class: SubjectClass) -> bool {
        self.subject_class == class && self.subject_id.as_deref() == subject_id
    }
}

pub trait ChallengeStore {
    fn create(&self, record: ChallengeRecord) -> Result<(), Error>;

    /// Most recently created live record for this subject.
    fn find_unconsumed_unexpired(
        &self,
        subject_id: Option<&str>,
        class: SubjectClass,
        now: OffsetDateTime,
    ) -> Result<Option<ChallengeRecord>, Error>;

    /// Marks the record consumed if and only if it is still live. Returns whether it did.
    fn mark_consumed(&self, value: &str, now: OffsetDateTime) -> Result<bool, Error>;

    fn delete_expired_or_used(&self, now: OffsetDateTime) -> Result<usize, Error>;

    /// Finds and consumes the most recent live record. A caller losing a race on the
    /// same record gets `None`. Stores able to do this in one statement should override it.
    fn consume(&self, subject_id: Option<&str>, class: SubjectClass, now: OffsetDateTime) -> Result<Option<ChallengeRecord>, Error> {
        match self.find_unconsumed_unexpired(subject_id, class, now)? {
            Some(mut record) if self.mark_consumed(&record.value, now)? => {
                record.consumed_at = Some(now);
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    /// Base64url credential id, globally unique.
    pub credential_id: String,
    pub subject_id: String,
    pub subject_class: SubjectClass,
    /// DER SubjectPublicKeyInfo.
    pub public_key: Vec<u8>,
    /// 0 means the authenticator does not report a counter.
    pub counter: u32,
    pub aaguid: String,
    pub transports: Vec<String>,
    pub nickname: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
}

pub trait CredentialStore {
    fn create(&self, credential: Credential) -> Result<(), Error>;

    fn find_by_id(&self, credential_id: &str) -> Result<Option<Credential>, Error>;

    fn find_by_subject(&self, subject_id: &str, class: SubjectClass) -> Result<Vec<Credential>, Error>;

    /// Last writer wins.
    fn update_counter_and_last_used(&self, credential_id: &str, counter: u32, last_used_at: OffsetDateTime) -> Result<(), Error>;

    fn delete(&self, credential_id: &str) -> Result<bool, Error>;
}

fn poisoned<T>(_: T) -> Error {
    Error::StorageError("store lock poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryChallengeStore {
    records: Mutex<Vec<ChallengeRecord>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, Vec<ChallengeRecord>>, Error> {
        self.records.lock().map_err(poisoned)
    }

    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.records()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.records()?.is_empty())
    }
}

impl ChallengeStore for MemoryChallengeStore {
    fn create(&self, record: ChallengeRecord) -> Result<(), Error> {
        self.records()?.push(record);
        Ok(())
    }

    fn find_unconsumed_unexpired(
        &self,
        subject_id: Option<&str>,
        class: SubjectClass,
        now: OffsetDateTime,
    ) -> Result<Option<ChallengeRecord>, Error> {
        Ok(self
            .records()?
            .iter()
            .rev()
            .find(|r| r.matches(subject_id, class) && r.is_live(now))
            .cloned())
    }

    fn mark_consumed(&self, value: &str, now: OffsetDateTime) -> Result<bool, Error> {
        let mut records = self.records()?;
        match records.iter_mut().find(|r| r.value == value && r.is_live(now)) {
            Some(record) => {
                record.consumed_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_expired_or_used(&self, now: OffsetDateTime) -> Result<usize, Error> {
        let mut records = self.records()?;
        let before = records.len();
        records.retain(|r| r.is_live(now));
        Ok(before - records.len())
    }

    fn consume(&self, subject_id: Option<&str>, class: SubjectClass, now: OffsetDateTime) -> Result<Option<ChallengeRecord>, Error> {
        let mut records = self.records()?;
        Ok(records
            .iter_mut()
            .rev()
            .find(|r| r.matches(subject_id, class) && r.is_live(now))
            .map(|record| {
                record.consumed_at = Some(now);
                record.clone()
            }))
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<Vec<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn create(&self, credential: Credential) -> Result<(), Error> {
        let mut credentials = self.credentials.write().map_err(poisoned)?;
        if credentials.iter().any(|c| c.credential_id == credential.credential_id) {
            return Err(Error::StorageError(format!(
                "credential {} already registered",
                credential.credential_id
            )));
        }
        credentials.push(credential);
        Ok(())
    }

    fn find_by_id(&self, credential_id: &str) -> Result<Option<Credential>, Error> {
        let credentials = self.credentials.read().map_err(poisoned)?;
        Ok(credentials.iter().find(|c| c.credential_id == credential_id).cloned())
    }

    fn find_by_subject(&self, subject_id: &str, class: SubjectClass) -> Result<Vec<Credential>, Error> {
        let credentials = self.credentials.read().map_err(poisoned)?;
        Ok(credentials
            .iter()
            .filter(|c| c.subject_id == subject_id && c.subject_class == class)
            .cloned()
            .collect())
    }

    fn update_counter_and_last_used(&self, credential_id: &str, counter: u32, last_used_at: OffsetDateTime) -> Result<(), Error> {
        let mut credentials = self.credentials.write().map_err(poisoned)?;
        let credential = credentials
            .iter_mut()
            .find(|c| c.credential_id == credential_id)
            .ok_or_else(|| Error::StorageError(format!("credential {} not found", credential_id)))?;
        credential.counter = counter;
        credential.last_used_at = Some(last_used_at);
        Ok(())
    }

    fn delete(&self, credential_id: &str) -> Result<bool, Error> {
        let mut credentials = self.credentials.write().map_err(poisoned)?;
        let before = credentials.len();
        credentials.retain(|c| c.credential_id != credential_id);
        Ok(credentials.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn record(value: &str, subject_id: Option<&str>, created_at: OffsetDateTime) -> ChallengeRecord {
        ChallengeRecord {
            value: value.to_string(),
            subject_id: subject_id.map(str::to_string),
            subject_class: SubjectClass::Customer,
            created_at,
            expires_at: created_at + Duration::minutes(5),
            consumed_at: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Store that only has the default, two step `consume`.
    struct TwoStepStore(MemoryChallengeStore);

    impl ChallengeStore for TwoStepStore {
        fn create(&self, record: ChallengeRecord) -> Result<(), Error> {
            self.0.create(record)
        }

        fn find_unconsumed_unexpired(
            &self,
            subject_id: Option<&str>,
            class: SubjectClass,
            now: OffsetDateTime,
        ) -> Result<Option<ChallengeRecord>, Error> {
            self.0.find_unconsumed_unexpired(subject_id, class, now)
        }

        fn mark_consumed(&self, value: &str, now: OffsetDateTime) -> Result<bool, Error> {
            self.0.mark_consumed(value, now)
        }

        fn delete_expired_or_used(&self, now: OffsetDateTime) -> Result<usize, Error> {
            self.0.delete_expired_or_used(now)
        }
    }

    #[test]
    fn test_consume_latest_matching() {
        let store = MemoryChallengeStore::new();
        let now = OffsetDateTime::now_utc();
        store.create(record("first", Some("alice"), now - Duration::seconds(10))).unwrap();
        store.create(record("second", Some("alice"), now)).unwrap();
        store.create(record("bob", Some("bob"), now)).unwrap();

        let consumed = store.consume(Some("alice"), SubjectClass::Customer, now).unwrap().unwrap();
        assert_eq!(consumed.value, "second");
        assert_eq!(consumed.consumed_at, Some(now));

        assert!(store.consume(Some("alice"), SubjectClass::Workforce, now).unwrap().is_none());
        assert!(store.consume(None, SubjectClass::Customer, now).unwrap().is_none());
    }

    #[test]
    fn test_default_consume_is_single_use() {
        let store = TwoStepStore(MemoryChallengeStore::new());
        let now = OffsetDateTime::now_utc();
        store.create(record("only", None, now)).unwrap();

        let found = store.find_unconsumed_unexpired(None, SubjectClass::Customer, now).unwrap().unwrap();
        assert!(store.mark_consumed(&found.value, now).unwrap());
        // A second racer that read the same row loses the conditional update.
        assert!(!store.mark_consumed(&found.value, now).unwrap());
        assert!(store.consume(None, SubjectClass::Customer, now).unwrap().is_none());
    }

    #[test]
    fn test_delete_expired_or_used() {
        let store = MemoryChallengeStore::new();
        let now = OffsetDateTime::now_utc();
        store.create(record("expired", None, now - Duration::minutes(10))).unwrap();
        store.create(record("used", None, now)).unwrap();
        store.create(record("live", Some("carol"), now)).unwrap();
        assert!(store.mark_consumed("used", now).unwrap());

        assert_eq!(store.delete_expired_or_used(now).unwrap(), 2);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_credential_store() {
        let store = MemoryCredentialStore::new();
        let now = OffsetDateTime::now_utc();
        let credential = Credential {
            credential_id: "AQID".to_string(),
            subject_id: "alice".to_string(),
            subject_class: SubjectClass::Workforce,
            public_key: vec![0x30],
            counter: 3,
            aaguid: "00000000-0000-0000-0000-000000000000".to_string(),
            transports: vec![],
            nickname: Some("laptop".to_string()),
            created_at: now,
            last_used_at: None,
        };

        store.create(credential.clone()).unwrap();
        assert!(store.create(credential.clone()).is_err());

        assert_eq!(store.find_by_subject("alice", SubjectClass::Workforce).unwrap().len(), 1);
        assert!(store.find_by_subject("alice", SubjectClass::Customer).unwrap().is_empty());

        store.update_counter_and_last_used("AQID", 9, now).unwrap();
        let updated = store.find_by_id("AQID").unwrap().unwrap();
        assert_eq!(updated.counter, 9);
        assert_eq!(updated.last_used_at, Some(now));

        assert!(store.delete("AQID").unwrap());
        assert!(!store.delete("AQID").unwrap());
        assert!(store.find_by_id("AQID").unwrap().is_none());
    }
}
