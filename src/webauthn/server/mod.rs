//! Relying-party side of the registration and assertion ceremonies.
//!
//! [`WebauthnServer`] is the entry point for callers: it issues options, consumes the
//! matching challenge and runs the verifiers against the relying party configured
//! for the subject class. The builders and verifiers can also be driven directly
//! with a [`CeremonyContext`].

pub mod authentication;
pub mod registration;

pub use self::{
    authentication::{AssertionResult, CredentialRequestBuilder, CredentialRequestVerifier},
    registration::{supported_algorithms, CredentialCreationBuilder, CredentialCreationResult, CredentialCreationVerifier},
};

use crate::webauthn::{
    challenge::{ChallengeManager, ChallengeMetadata},
    config::{RelyingParty, SubjectClass, WebauthnConfig},
    error::{CredentialError, Error},
    proto::web_message::{CollectedClientData, PublicKeyCredential, PublicKeyCredentialCreationOptions, PublicKeyCredentialRequestOptions},
    store::{ChallengeStore, Credential, CredentialStore},
};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{info, warn};

/// What a verifier checks a response against. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CeremonyContext {
    pub expected_challenge: String,
    pub rp_id: String,
    pub origin: String,
    pub algorithms: Vec<i64>,
}

impl CeremonyContext {
    pub fn new(rp: &RelyingParty, expected_challenge: String) -> Self {
        CeremonyContext {
            expected_challenge,
            rp_id: rp.id.clone(),
            origin: rp.origin.clone(),
            algorithms: supported_algorithms(),
        }
    }

    pub fn rp_id_hash(&self) -> [u8; 32] {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&Sha256::digest(self.rp_id.as_bytes()));
        hash
    }
}

/// Decodes the client data and checks type, challenge and origin. Returns the raw
/// JSON bytes, which assertion signatures cover.
pub(crate) fn verify_client_data(client_data_json: &str, request_type: &str, context: &CeremonyContext) -> Result<Vec<u8>, Error> {
    let raw = crate::base64::decode_urlsafe(client_data_json)?;
    let client_data: CollectedClientData = serde_json::from_slice(&raw)?;

    if client_data.request_type != request_type {
        return Err(CredentialError::RequestType.into());
    }

    if client_data.challenge != context.expected_challenge {
        warn!("ceremony rejected: challenge mismatch");
        return Err(CredentialError::Challenge.into());
    }

    if client_data.origin != context.origin {
        warn!(origin = %client_data.origin, expected = %context.origin, "ceremony rejected: origin mismatch");
        return Err(CredentialError::Origin.into());
    }

    Ok(raw)
}

/// Subject a registration binds the credential to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebauthnUser {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

impl WebauthnUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>, display_name: impl Into<String>) -> Self {
        WebauthnUser {
            id: id.into(),
            name: name.into(),
            display_name: display_name.into(),
        }
    }

    /// Opaque handle sent to the authenticator.
    pub fn handle(&self) -> String {
        crate::base64::encode_urlsafe(self.id.as_bytes())
    }
}

pub struct WebauthnServer<C, K> {
    config: WebauthnConfig,
    challenges: ChallengeManager<C>,
    credentials: K,
}

impl<C: ChallengeStore, K: CredentialStore> WebauthnServer<C, K> {
    pub fn new(config: WebauthnConfig, challenge_store: C, credential_store: K) -> Self {
        let challenges = ChallengeManager::new(challenge_store, config.challenge_ttl());
        WebauthnServer {
            config,
            challenges,
            credentials: credential_store,
        }
    }

    pub fn config(&self) -> &WebauthnConfig {
        &self.config
    }

    pub fn challenge_store(&self) -> &C {
        self.challenges.store()
    }

    pub fn credential_store(&self) -> &K {
        &self.credentials
    }

    pub fn create_challenge(&self, class: SubjectClass, subject_id: Option<&str>, metadata: ChallengeMetadata) -> Result<String, Error> {
        self.challenges.create_challenge(subject_id, class, metadata)
    }

    pub fn consume_challenge(&self, class: SubjectClass, subject_id: Option<&str>) -> Result<String, Error> {
        self.challenges.consume_challenge(subject_id, class)
    }

    pub fn build_registration_options(
        &self,
        class: SubjectClass,
        user: &WebauthnUser,
        existing_credential_ids: &[String],
        metadata: ChallengeMetadata,
    ) -> Result<PublicKeyCredentialCreationOptions, Error> {
        let rp = self.config.relying_party(class);
        let challenge = self.challenges.create_challenge(Some(&user.id), class, metadata)?;

        existing_credential_ids
            .iter()
            .fold(CredentialCreationBuilder::new(), |builder, id| builder.exclude_credential(id.clone()))
            .challenge(challenge)
            .user(user.handle(), user.name.clone(), user.display_name.clone())
            .rp(rp.name.clone(), Some(rp.id.clone()))
            .timeout(self.config.timeout_ms)
            .build()
    }

    /// Consumes the subject's challenge, then verifies. The challenge stays consumed
    /// whatever the outcome.
    pub fn verify_registration(
        &self,
        class: SubjectClass,
        subject_id: &str,
        credential: PublicKeyCredential,
    ) -> Result<CredentialCreationResult, Error> {
        let challenge = self.challenges.consume_challenge(Some(subject_id), class)?;
        let context = CeremonyContext::new(self.config.relying_party(class), challenge);

        CredentialCreationVerifier::new(credential, &context).verify()
    }

    /// With no resolved subject, returns options of the same shape around a challenge
    /// that is never stored, so verifying against it fails at consumption.
    pub fn build_assertion_options(
        &self,
        class: SubjectClass,
        subject_id: Option<&str>,
        credential_ids: &[String],
        metadata: ChallengeMetadata,
    ) -> Result<PublicKeyCredentialRequestOptions, Error> {
        let rp = self.config.relying_party(class);

        let builder = match subject_id {
            Some(subject_id) => credential_ids
                .iter()
                .fold(CredentialRequestBuilder::new(), |builder, id| builder.allow_credential(id.clone()))
                .challenge(self.challenges.create_challenge(Some(subject_id), class, metadata)?),
            None => CredentialRequestBuilder::new().challenge(self.challenges.dummy_challenge()?),
        };

        builder.rp(rp.id.clone()).timeout(self.config.timeout_ms).build()
    }

    pub fn verify_assertion(
        &self,
        class: SubjectClass,
        subject_id: &str,
        credential: PublicKeyCredential,
        public_key: &[u8],
        sign_count: u32,
    ) -> Result<AssertionResult, Error> {
        let challenge = self.challenges.consume_challenge(Some(subject_id), class)?;
        let context = CeremonyContext::new(self.config.relying_party(class), challenge);

        CredentialRequestVerifier::new(credential, &context, public_key, sign_count).verify()
    }

    /// Registration options excluding every credential the subject already owns.
    pub fn start_registration(
        &self,
        class: SubjectClass,
        user: &WebauthnUser,
        metadata: ChallengeMetadata,
    ) -> Result<PublicKeyCredentialCreationOptions, Error> {
        let existing = self.credential_ids(&user.id, class)?;
        self.build_registration_options(class, user, &existing, metadata)
    }

    pub fn finish_registration(
        &self,
        class: SubjectClass,
        subject_id: &str,
        credential: PublicKeyCredential,
        nickname: Option<String>,
    ) -> Result<Credential, Error> {
        let result = self.verify_registration(class, subject_id, credential)?;

        let credential = Credential {
            credential_id: result.credential_id,
            subject_id: subject_id.to_string(),
            subject_class: class,
            public_key: result.public_key,
            counter: result.sign_count,
            aaguid: result.aaguid,
            transports: result.transports,
            nickname,
            created_at: OffsetDateTime::now_utc(),
            last_used_at: None,
        };
        self.credentials.create(credential.clone())?;

        info!(subject_class = %class, credential_id = %credential.credential_id, aaguid = %credential.aaguid, "registered passkey");
        Ok(credential)
    }

    /// `subject_id` is `None` when the caller could not resolve one.
    pub fn start_authentication(
        &self,
        class: SubjectClass,
        subject_id: Option<&str>,
        metadata: ChallengeMetadata,
    ) -> Result<PublicKeyCredentialRequestOptions, Error> {
        let allowed = match subject_id {
            Some(subject_id) => self.credential_ids(subject_id, class)?,
            None => Vec::new(),
        };

        self.build_assertion_options(class, subject_id, &allowed, metadata)
    }

    /// Verifies an assertion for a stored credential and records the new counter.
    /// Returns the credential as persisted.
    pub fn finish_authentication(&self, class: SubjectClass, subject_id: &str, credential: PublicKeyCredential) -> Result<Credential, Error> {
        let challenge = self.challenges.consume_challenge(Some(subject_id), class)?;

        let mut stored = self
            .credentials
            .find_by_id(&credential.id)?
            .ok_or(CredentialError::CredentialNotFound)?;
        if stored.subject_id != subject_id || stored.subject_class != class {
            warn!(subject_class = %class, credential_id = %stored.credential_id, "assertion rejected: credential owned by another subject");
            return Err(CredentialError::CredentialOwner.into());
        }

        let context = CeremonyContext::new(self.config.relying_party(class), challenge);
        let result = CredentialRequestVerifier::new(credential, &context, &stored.public_key, stored.counter).verify()?;

        let now = OffsetDateTime::now_utc();
        self.credentials
            .update_counter_and_last_used(&stored.credential_id, result.sign_count, now)?;
        stored.counter = result.sign_count;
        stored.last_used_at = Some(now);

        info!(subject_class = %class, credential_id = %stored.credential_id, "authenticated with passkey");
        Ok(stored)
    }

    fn credential_ids(&self, subject_id: &str, class: SubjectClass) -> Result<Vec<String>, Error> {
        Ok(self
            .credentials
            .find_by_subject(subject_id, class)?
            .into_iter()
            .map(|c| c.credential_id)
            .collect())
    }
}

#[cfg(all(test, feature = "authenticator"))]
mod tests {
    use super::*;
    use crate::webauthn::{
        authenticator::{AttestationFlags, SoftwareAuthenticator},
        error::{ChallengeError, ErrorKind},
        store::{MemoryChallengeStore, MemoryCredentialStore},
    };
    use uuid::Uuid;

    const WORKFORCE_ORIGIN: &str = "http://localhost:3000";
    const CUSTOMER_ORIGIN: &str = "https://shop.example.com";

    fn server() -> WebauthnServer<MemoryChallengeStore, MemoryCredentialStore> {
        let config = WebauthnConfig::builder()
            .workforce(RelyingParty::new("Staff", WORKFORCE_ORIGIN, None))
            .customer(RelyingParty::new("Shop", CUSTOMER_ORIGIN, None))
            .build()
            .unwrap();

        WebauthnServer::new(config, MemoryChallengeStore::new(), MemoryCredentialStore::new())
    }

    fn alice() -> WebauthnUser {
        WebauthnUser::new("alice", "alice@example.com", "Alice")
    }

    fn register(
        server: &WebauthnServer<MemoryChallengeStore, MemoryCredentialStore>,
        class: SubjectClass,
        origin: &str,
        authenticator: &SoftwareAuthenticator,
    ) -> Credential {
        let options = server.start_registration(class, &alice(), ChallengeMetadata::default()).unwrap();
        let response = authenticator.register(&options, origin).unwrap();
        server
            .finish_registration(class, "alice", response, Some("laptop".to_string()))
            .unwrap()
    }

    #[test]
    fn test_registration_options() {
        let server = server();
        let options = server
            .build_registration_options(
                SubjectClass::Customer,
                &alice(),
                &["AQID".to_string()],
                ChallengeMetadata::default(),
            )
            .unwrap();

        assert_eq!(options.rp.id.as_deref(), Some("shop.example.com"));
        assert_eq!(options.rp.name, "Shop");
        assert_eq!(options.user.id, "YWxpY2U");
        assert_eq!(options.user.display_name, "Alice");
        assert_eq!(options.timeout, Some(300_000));
        assert_eq!(options.exclude_credentials.len(), 1);
        assert_eq!(server.challenge_store().len().unwrap(), 1);
    }

    #[test]
    fn test_register_then_authenticate() {
        let server = server();
        let authenticator = SoftwareAuthenticator::new_p256(Uuid::new_v4()).unwrap();

        let credential = register(&server, SubjectClass::Workforce, WORKFORCE_ORIGIN, &authenticator);
        assert_eq!(credential.credential_id, authenticator.credential_id());
        assert_eq!(credential.nickname.as_deref(), Some("laptop"));
        assert_eq!(credential.counter, 0);

        let options = server
            .start_authentication(SubjectClass::Workforce, Some("alice"), ChallengeMetadata::default())
            .unwrap();
        assert_eq!(options.allow_credentials.len(), 1);
        assert_eq!(options.allow_credentials[0].id, credential.credential_id);

        let response = authenticator.assert(&options, WORKFORCE_ORIGIN, 1).unwrap();
        let updated = server
            .finish_authentication(SubjectClass::Workforce, "alice", response)
            .unwrap();
        assert_eq!(updated.counter, 1);
        assert!(updated.last_used_at.is_some());

        let persisted = server.credential_store().find_by_id(&credential.credential_id).unwrap().unwrap();
        assert_eq!(persisted, updated);
    }

    #[test]
    fn test_second_registration_excludes_first() {
        let server = server();
        let first = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();
        let credential = register(&server, SubjectClass::Customer, CUSTOMER_ORIGIN, &first);

        let options = server
            .start_registration(SubjectClass::Customer, &alice(), ChallengeMetadata::default())
            .unwrap();
        assert_eq!(options.exclude_credentials.len(), 1);
        assert_eq!(options.exclude_credentials[0].id, credential.credential_id);
    }

    #[test]
    fn test_rsa_round_trip() {
        let server = server();
        let authenticator = SoftwareAuthenticator::new_rsa(Uuid::nil(), 2048).unwrap();
        register(&server, SubjectClass::Customer, CUSTOMER_ORIGIN, &authenticator);

        let options = server
            .start_authentication(SubjectClass::Customer, Some("alice"), ChallengeMetadata::default())
            .unwrap();
        let response = authenticator.assert(&options, CUSTOMER_ORIGIN, 3).unwrap();
        let updated = server
            .finish_authentication(SubjectClass::Customer, "alice", response)
            .unwrap();
        assert_eq!(updated.counter, 3);
    }

    #[test]
    fn test_challenge_consumed_even_when_verification_fails() {
        let server = server();
        let authenticator = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();

        let options = server
            .start_registration(SubjectClass::Workforce, &alice(), ChallengeMetadata::default())
            .unwrap();
        let response = authenticator.register(&options, "https://evil.example").unwrap();

        let err = server
            .verify_registration(SubjectClass::Workforce, "alice", response.clone())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signature);

        let err = server
            .verify_registration(SubjectClass::Workforce, "alice", response)
            .unwrap_err();
        assert!(matches!(err, Error::ChallengeError(ChallengeError::NotFound)));
    }

    #[test]
    fn test_subject_classes_are_isolated() {
        let server = server();
        let authenticator = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();

        let options = server
            .start_registration(SubjectClass::Workforce, &alice(), ChallengeMetadata::default())
            .unwrap();
        let response = authenticator.register(&options, WORKFORCE_ORIGIN).unwrap();

        let err = server
            .verify_registration(SubjectClass::Customer, "alice", response)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Challenge);
    }

    #[test]
    fn test_anti_enumeration() {
        let server = server();
        let options = server
            .start_authentication(SubjectClass::Customer, None, ChallengeMetadata::default())
            .unwrap();

        assert_eq!(crate::base64::decode_urlsafe(&options.challenge).unwrap().len(), 32);
        assert!(options.allow_credentials.is_empty());
        assert_eq!(options.rp_id.as_deref(), Some("shop.example.com"));
        assert!(server.challenge_store().is_empty().unwrap());

        let authenticator = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();
        let response = authenticator.assert(&options, CUSTOMER_ORIGIN, 1).unwrap();
        let err = server
            .verify_assertion(SubjectClass::Customer, "ghost", response, &authenticator.public_key_der().unwrap(), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Challenge);
    }

    #[test]
    fn test_verify_assertion_counters() {
        let server = server();
        let authenticator = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();
        let der = authenticator.public_key_der().unwrap();
        let up = AttestationFlags::UserPresent as u8;

        // Counter-less authenticator against a stored counter of 5.
        let challenge = server
            .create_challenge(SubjectClass::Workforce, Some("alice"), ChallengeMetadata::default())
            .unwrap();
        let response = authenticator
            .assertion_response("localhost", WORKFORCE_ORIGIN, &challenge, 0, up)
            .unwrap();
        let result = server
            .verify_assertion(SubjectClass::Workforce, "alice", response, &der, 5)
            .unwrap();
        assert_eq!(result.sign_count, 0);

        let challenge = server
            .create_challenge(SubjectClass::Workforce, Some("alice"), ChallengeMetadata::default())
            .unwrap();
        let response = authenticator
            .assertion_response("localhost", WORKFORCE_ORIGIN, &challenge, 5, up)
            .unwrap();
        let err = server
            .verify_assertion(SubjectClass::Workforce, "alice", response, &der, 5)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Replay);
    }

    #[test]
    fn test_finish_authentication_checks_owner() {
        let server = server();
        let authenticator = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();
        register(&server, SubjectClass::Workforce, WORKFORCE_ORIGIN, &authenticator);

        let options = server
            .start_authentication(SubjectClass::Workforce, Some("bob"), ChallengeMetadata::default())
            .unwrap();
        assert!(options.allow_credentials.is_empty());
        let response = authenticator.assert(&options, WORKFORCE_ORIGIN, 1).unwrap();
        let err = server
            .finish_authentication(SubjectClass::Workforce, "bob", response)
            .unwrap_err();
        assert!(matches!(err, Error::CredentialError(CredentialError::CredentialOwner)));

        let stranger = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();
        let options = server
            .start_authentication(SubjectClass::Workforce, Some("alice"), ChallengeMetadata::default())
            .unwrap();
        let response = stranger.assert(&options, WORKFORCE_ORIGIN, 1).unwrap();
        let err = server
            .finish_authentication(SubjectClass::Workforce, "alice", response)
            .unwrap_err();
        assert!(matches!(err, Error::CredentialError(CredentialError::CredentialNotFound)));
    }

    #[test]
    fn test_replayed_assertion_is_rejected() {
        let server = server();
        let authenticator = SoftwareAuthenticator::new_p256(Uuid::nil()).unwrap();
        register(&server, SubjectClass::Workforce, WORKFORCE_ORIGIN, &authenticator);

        let options = server
            .start_authentication(SubjectClass::Workforce, Some("alice"), ChallengeMetadata::default())
            .unwrap();
        let response = authenticator.assert(&options, WORKFORCE_ORIGIN, 7).unwrap();
        server
            .finish_authentication(SubjectClass::Workforce, "alice", response)
            .unwrap();

        let options = server
            .start_authentication(SubjectClass::Workforce, Some("alice"), ChallengeMetadata::default())
            .unwrap();
        let response = authenticator.assert(&options, WORKFORCE_ORIGIN, 7).unwrap();
        let err = server
            .finish_authentication(SubjectClass::Workforce, "alice", response)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Replay);
        assert_eq!(
            server
                .credential_store()
                .find_by_subject("alice", SubjectClass::Workforce)
                .unwrap()[0]
                .counter,
            7
        );
    }
}
