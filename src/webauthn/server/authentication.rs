use crate::webauthn::{
    error::{CredentialError, Error},
    proto::{
        constants::WEBAUTHN_REQUEST_TYPE_GET,
        raw_message::{AuthenticatorData, Message},
        web_message::{PublicKeyCredential, PublicKeyCredentialDescriptor, PublicKeyCredentialRequestOptions, UserVerificationRequirement},
    },
    server::{verify_client_data, CeremonyContext},
    signature::verify_signature,
};
use sha2::{Digest, Sha256};
use tracing::warn;

pub struct CredentialRequestBuilder {
    challenge: Option<String>,
    rp_id: Option<String>,
    allow_credentials: Vec<String>,
    timeout: Option<u64>,
    user_verification: UserVerificationRequirement,
}

impl CredentialRequestBuilder {
    pub fn new() -> Self {
        CredentialRequestBuilder {
            challenge: None,
            rp_id: None,
            allow_credentials: Vec::new(),
            timeout: None,
            user_verification: UserVerificationRequirement::Preferred,
        }
    }

    pub fn challenge(mut self, challenge: String) -> Self {
        self.challenge = Some(challenge);
        self
    }

    pub fn rp(mut self, rp_id: String) -> Self {
        self.rp_id = Some(rp_id);
        self
    }

    pub fn allow_credential(mut self, id: String) -> Self {
        self.allow_credentials.push(id);
        self
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn user_verification(mut self, requirement: UserVerificationRequirement) -> Self {
        self.user_verification = requirement;
        self
    }

    pub fn build(self) -> Result<PublicKeyCredentialRequestOptions, Error> {
        let challenge = self
            .challenge
            .ok_or_else(|| Error::Other("Unable to build a WebAuthn request without a challenge".to_string()))?;

        Ok(PublicKeyCredentialRequestOptions {
            challenge,
            timeout: self.timeout,
            rp_id: self.rp_id,
            allow_credentials: self
                .allow_credentials
                .into_iter()
                .map(PublicKeyCredentialDescriptor::public_key)
                .collect(),
            user_verification: Some(self.user_verification),
        })
    }
}

impl Default for CredentialRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssertionResult {
    /// Counter reported by the authenticator, to be persisted by the caller.
    pub sign_count: u32,
    pub user_verified: bool,
}

pub struct CredentialRequestVerifier<'a> {
    pub credential: PublicKeyCredential,
    pub context: &'a CeremonyContext,
    pub public_key: &'a [u8],
    pub sign_count: u32,
}

impl<'a> CredentialRequestVerifier<'a> {
    /// `public_key` is the stored DER SubjectPublicKeyInfo and `sign_count` the stored counter.
    pub fn new(credential: PublicKeyCredential, context: &'a CeremonyContext, public_key: &'a [u8], sign_count: u32) -> Self {
        CredentialRequestVerifier {
            credential,
            context,
            public_key,
            sign_count,
        }
    }

    pub fn verify(&self) -> Result<AssertionResult, Error> {
        let response = &self.credential.response;

        let client_data = verify_client_data(&response.client_data_json, WEBAUTHN_REQUEST_TYPE_GET, self.context)?;

        let raw_auth_data = crate::base64::decode_urlsafe(
            response
                .authenticator_data
                .as_ref()
                .ok_or(CredentialError::AuthenticatorDataMissing)?,
        )?;
        let auth_data = AuthenticatorData::from_bytes(&raw_auth_data)?;

        if auth_data.rp_id_hash != self.context.rp_id_hash() {
            warn!(rp_id = %self.context.rp_id, "assertion rejected: rp id hash mismatch");
            return Err(CredentialError::Rpid.into());
        }

        if !auth_data.user_present() {
            return Err(CredentialError::UserPresentFlag.into());
        }

        // A zero counter means the authenticator does not implement one.
        if auth_data.sign_count > 0 && auth_data.sign_count <= self.sign_count {
            warn!(
                credential_id = %self.credential.id,
                stored = self.sign_count,
                received = auth_data.sign_count,
                "assertion rejected: signature counter did not increase"
            );
            return Err(Error::ReplayError {
                stored: self.sign_count,
                received: auth_data.sign_count,
            });
        }

        let signature = crate::base64::decode_urlsafe(response.signature.as_ref().ok_or(CredentialError::SignatureMissing)?)?;

        let mut signed = raw_auth_data;
        signed.extend_from_slice(&Sha256::digest(&client_data));

        verify_signature(self.public_key, &signed, &signature).map_err(|e| {
            warn!(credential_id = %self.credential.id, "assertion rejected: bad signature");
            e
        })?;

        Ok(AssertionResult {
            sign_count: auth_data.sign_count,
            user_verified: auth_data.user_verified(),
        })
    }
}
