use crate::webauthn::{
    error::{CredentialError, Error},
    proto::{
        constants::{COSE_ALGORITHM_IDENTIFIER_ES256, COSE_ALGORITHM_IDENTIFIER_RS256, WEBAUTHN_FORMAT_NONE, WEBAUTHN_REQUEST_TYPE_CREATE},
        cose::CredentialPublicKey,
        raw_message::{AttestationObject, Message},
        web_message::{
            AttestationConveyancePreference, AuthenticatorSelectionCriteria, PublicKeyCredential, PublicKeyCredentialCreationOptions,
            PublicKeyCredentialDescriptor, PublicKeyCredentialParameters, PublicKeyCredentialRpEntity, PublicKeyCredentialType,
            PublicKeyCredentialUserEntity, ResidentKeyRequirement, UserVerificationRequirement,
        },
    },
    server::{verify_client_data, CeremonyContext},
};
use tracing::{debug, warn};

pub struct CredentialCreationBuilder {
    challenge: Option<String>,
    user: Option<User>,
    rp: Option<Rp>,
    exclude_credentials: Vec<String>,
    timeout: Option<u64>,
}

impl CredentialCreationBuilder {
    pub fn new() -> Self {
        CredentialCreationBuilder {
            challenge: None,
            user: None,
            rp: None,
            exclude_credentials: Vec::new(),
            timeout: None,
        }
    }

    pub fn challenge(mut self, challenge: String) -> Self {
        self.challenge = Some(challenge);
        self
    }

    /// `id` is the opaque user handle, already base64url encoded.
    pub fn user(mut self, id: String, name: String, display_name: String) -> Self {
        self.user = Some(User { id, name, display_name });
        self
    }

    pub fn rp(mut self, name: String, id: Option<String>) -> Self {
        self.rp = Some(Rp { name, id });
        self
    }

    pub fn exclude_credential(mut self, id: String) -> Self {
        self.exclude_credentials.push(id);
        self
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn build(self) -> Result<PublicKeyCredentialCreationOptions, Error> {
        let challenge = self
            .challenge
            .ok_or_else(|| Error::Other("Unable to build a WebAuthn request without a challenge".to_string()))?;

        let user = self
            .user
            .map(|user| PublicKeyCredentialUserEntity {
                id: user.id,
                name: user.name,
                display_name: user.display_name,
            })
            .ok_or_else(|| Error::Other("Unable to build a WebAuthn request without a user".to_string()))?;

        let rp = self
            .rp
            .map(|rp| PublicKeyCredentialRpEntity { id: rp.id, name: rp.name })
            .ok_or_else(|| Error::Other("Unable to build a WebAuthn request without a relying party".to_string()))?;

        Ok(PublicKeyCredentialCreationOptions {
            rp,
            user,
            challenge,
            pub_key_cred_params: supported_algorithms()
                .into_iter()
                .map(|alg| PublicKeyCredentialParameters {
                    auth_type: PublicKeyCredentialType::PublicKey,
                    alg,
                })
                .collect(),
            timeout: self.timeout,
            exclude_credentials: self
                .exclude_credentials
                .into_iter()
                .map(PublicKeyCredentialDescriptor::public_key)
                .collect(),
            authenticator_selection: Some(AuthenticatorSelectionCriteria {
                authenticator_attachment: None,
                resident_key: Some(ResidentKeyRequirement::Preferred),
                user_verification: Some(UserVerificationRequirement::Preferred),
            }),
            attestation: Some(AttestationConveyancePreference::None),
        })
    }
}

impl Default for CredentialCreationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct User {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

struct Rp {
    pub name: String,
    pub id: Option<String>,
}

/// ES256 then RS256, in order of preference.
pub fn supported_algorithms() -> Vec<i64> {
    vec![COSE_ALGORITHM_IDENTIFIER_ES256, COSE_ALGORITHM_IDENTIFIER_RS256]
}

/// What a successful registration yields, ready to be persisted by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialCreationResult {
    /// Base64url.
    pub credential_id: String,
    /// DER SubjectPublicKeyInfo.
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub aaguid: String,
    pub transports: Vec<String>,
}

pub struct CredentialCreationVerifier<'a> {
    pub credential: PublicKeyCredential,
    pub context: &'a CeremonyContext,
}

impl<'a> CredentialCreationVerifier<'a> {
    pub fn new(credential: PublicKeyCredential, context: &'a CeremonyContext) -> Self {
        CredentialCreationVerifier { credential, context }
    }

    pub fn verify(&self) -> Result<CredentialCreationResult, Error> {
        let response = &self.credential.response;

        verify_client_data(&response.client_data_json, WEBAUTHN_REQUEST_TYPE_CREATE, self.context)?;

        let attestation_object = response
            .attestation_object
            .as_ref()
            .ok_or_else(|| Error::Other("Missing attestation object".to_string()))?;
        let attestation = AttestationObject::from_base64(attestation_object)?;
        if attestation.fmt != WEBAUTHN_FORMAT_NONE {
            debug!(fmt = %attestation.fmt, "attestation statement accepted without verification");
        }

        let auth_data = &attestation.auth_data;
        let attested = auth_data
            .attested_credential_data
            .as_ref()
            .ok_or(CredentialError::AttestationMissing)?;

        if auth_data.rp_id_hash != self.context.rp_id_hash() {
            warn!(rp_id = %self.context.rp_id, "registration rejected: rp id hash mismatch");
            return Err(CredentialError::Rpid.into());
        }

        if !auth_data.user_present() {
            return Err(CredentialError::UserPresentFlag.into());
        }

        let public_key = CredentialPublicKey::from_value(&attested.credential_public_key)?;
        if let Some(alg) = public_key.alg {
            if !self.context.algorithms.contains(&alg) {
                return Err(Error::UnsupportedAlgorithm(format!("COSE algorithm {}", alg)));
            }
        }

        Ok(CredentialCreationResult {
            credential_id: crate::base64::encode_urlsafe(&attested.credential_id),
            public_key: public_key.to_spki_der()?,
            sign_count: auth_data.sign_count,
            aaguid: attested.aaguid_string(),
            transports: Vec::new(),
        })
    }
}
