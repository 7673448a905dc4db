//! In-process authenticator producing "none" attestation registrations and signed
//! assertions. Meant for tests and demos, never for holding real credentials.

use crate::webauthn::{
    error::Error,
    proto::{
        constants::{
            COSE_ALGORITHM_IDENTIFIER_ES256, COSE_ALGORITHM_IDENTIFIER_RS256, COSE_KEY_ALG, COSE_KEY_EC2_CRV, COSE_KEY_EC2_X,
            COSE_KEY_EC2_Y, COSE_KEY_KTY, COSE_KEY_RSA_E, COSE_KEY_RSA_N, ECDSA_CURVE_P256, WEBAUTHN_FORMAT_NONE,
            WEBAUTHN_REQUEST_TYPE_CREATE, WEBAUTHN_REQUEST_TYPE_GET, WEBAUTH_PUBLIC_KEY_TYPE_EC2, WEBAUTH_PUBLIC_KEY_TYPE_RSA,
        },
        web_message::{
            get_default_rp_id, AuthenticatorResponse, CollectedClientData, PublicKeyCredential, PublicKeyCredentialCreationOptions,
            PublicKeyCredentialParameters, PublicKeyCredentialRequestOptions, UserVerificationRequirement,
        },
    },
};
use byteorder::{BigEndian, WriteBytesExt};
use p256::{
    ecdsa::{signature::Signer, Signature, SigningKey},
    elliptic_curve::sec1::ToEncodedPoint,
    pkcs8::EncodePublicKey as _,
};
use rand_core::OsRng;
use ring::rand::{SecureRandom, SystemRandom};
use rsa::{pkcs8::EncodePublicKey as _, traits::PublicKeyParts, Pkcs1v15Sign, RsaPrivateKey};
use serde_cbor::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

const CREDENTIAL_ID_LENGTH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttestationFlags {
    UserPresent = 1,
    UserVerified = 4,
    AttestedCredentialDataIncluded = 64,
    ExtensionDataIncluded = 128,
}

enum CredentialKey {
    P256(SigningKey),
    Rsa(Box<RsaPrivateKey>),
}

pub struct SoftwareAuthenticator {
    aaguid: Uuid,
    credential_id: Vec<u8>,
    key: CredentialKey,
}

impl SoftwareAuthenticator {
    pub fn new_p256(aaguid: Uuid) -> Result<Self, Error> {
        Ok(SoftwareAuthenticator {
            aaguid,
            credential_id: random_credential_id()?,
            key: CredentialKey::P256(SigningKey::random(&mut OsRng)),
        })
    }

    pub fn new_rsa(aaguid: Uuid, bits: usize) -> Result<Self, Error> {
        let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| Error::Other(format!("could not generate RSA key: {}", e)))?;
        Ok(SoftwareAuthenticator {
            aaguid,
            credential_id: random_credential_id()?,
            key: CredentialKey::Rsa(Box::new(key)),
        })
    }

    /// Deterministic P-256 credential, for fixtures.
    pub fn from_p256_key(aaguid: Uuid, credential_id: Vec<u8>, key: SigningKey) -> Self {
        SoftwareAuthenticator {
            aaguid,
            credential_id,
            key: CredentialKey::P256(key),
        }
    }

    /// Generates a credential for the best algorithm the options accept.
    pub fn for_options(options: &PublicKeyCredentialCreationOptions, aaguid: Uuid) -> Result<Self, Error> {
        match find_best_supported_algorithm(&options.pub_key_cred_params)? {
            COSE_ALGORITHM_IDENTIFIER_ES256 => Self::new_p256(aaguid),
            _ => Self::new_rsa(aaguid, 2048),
        }
    }

    pub fn credential_id(&self) -> String {
        crate::base64::encode_urlsafe(&self.credential_id)
    }

    pub fn public_key_der(&self) -> Result<Vec<u8>, Error> {
        let der = match &self.key {
            CredentialKey::P256(key) => key.verifying_key().to_public_key_der(),
            CredentialKey::Rsa(key) => key.to_public_key().to_public_key_der(),
        }
        .map_err(|e| Error::Other(e.to_string()))?;

        Ok(der.as_bytes().to_vec())
    }

    pub fn cose_key(&self) -> Value {
        let mut map = BTreeMap::new();
        match &self.key {
            CredentialKey::P256(key) => {
                let point = p256::PublicKey::from(key.verifying_key()).to_encoded_point(false);
                map.insert(Value::Integer(COSE_KEY_KTY.into()), Value::Integer(WEBAUTH_PUBLIC_KEY_TYPE_EC2.into()));
                map.insert(Value::Integer(COSE_KEY_ALG.into()), Value::Integer(COSE_ALGORITHM_IDENTIFIER_ES256.into()));
                map.insert(Value::Integer(COSE_KEY_EC2_CRV.into()), Value::Integer(ECDSA_CURVE_P256.into()));
                map.insert(
                    Value::Integer(COSE_KEY_EC2_X.into()),
                    Value::Bytes(point.x().map(|x| x.to_vec()).unwrap_or_default()),
                );
                map.insert(
                    Value::Integer(COSE_KEY_EC2_Y.into()),
                    Value::Bytes(point.y().map(|y| y.to_vec()).unwrap_or_default()),
                );
            }
            CredentialKey::Rsa(key) => {
                map.insert(Value::Integer(COSE_KEY_KTY.into()), Value::Integer(WEBAUTH_PUBLIC_KEY_TYPE_RSA.into()));
                map.insert(Value::Integer(COSE_KEY_ALG.into()), Value::Integer(COSE_ALGORITHM_IDENTIFIER_RS256.into()));
                map.insert(Value::Integer(COSE_KEY_RSA_N.into()), Value::Bytes(key.n().to_bytes_be()));
                map.insert(Value::Integer(COSE_KEY_RSA_E.into()), Value::Bytes(key.e().to_bytes_be()));
            }
        }

        Value::Map(map)
    }

    /// `rp_id_hash || flags || counter`, followed by the attested credential data when
    /// `cose_key` is given.
    pub fn authenticator_data(&self, rp_id: &str, flags: u8, sign_count: u32, cose_key: Option<&Value>) -> Result<Vec<u8>, Error> {
        let mut data = Sha256::digest(rp_id.as_bytes()).to_vec();
        data.push(flags);
        data.write_u32::<BigEndian>(sign_count)?;

        if let Some(cose_key) = cose_key {
            data.extend_from_slice(self.aaguid.as_bytes());
            data.write_u16::<BigEndian>(self.credential_id.len() as u16)?;
            data.extend_from_slice(&self.credential_id);
            data.extend_from_slice(&serde_cbor::to_vec(cose_key).map_err(|e| Error::Other(e.to_string()))?);
        }

        Ok(data)
    }

    pub fn attestation_object_with_key(&self, rp_id: &str, flags: u8, sign_count: u32, cose_key: &Value) -> Result<Vec<u8>, Error> {
        let attested = flags & AttestationFlags::AttestedCredentialDataIncluded as u8 != 0;
        let auth_data = self.authenticator_data(rp_id, flags, sign_count, attested.then_some(cose_key))?;

        let mut map = BTreeMap::new();
        map.insert(Value::Text("fmt".to_string()), Value::Text(WEBAUTHN_FORMAT_NONE.to_string()));
        map.insert(Value::Text("attStmt".to_string()), Value::Map(BTreeMap::new()));
        map.insert(Value::Text("authData".to_string()), Value::Bytes(auth_data));

        serde_cbor::to_vec(&Value::Map(map)).map_err(|e| Error::Other(e.to_string()))
    }

    pub fn registration_response(&self, rp_id: &str, origin: &str, challenge: &str, flags: u8) -> Result<PublicKeyCredential, Error> {
        let attestation_object = self.attestation_object_with_key(rp_id, flags, 0, &self.cose_key())?;

        Ok(PublicKeyCredential {
            id: self.credential_id(),
            raw_id: Some(self.credential_id()),
            response: AuthenticatorResponse {
                attestation_object: Some(crate::base64::encode_urlsafe(attestation_object)),
                client_data_json: crate::base64::encode_urlsafe(client_data(WEBAUTHN_REQUEST_TYPE_CREATE, challenge, origin)?),
                ..Default::default()
            },
        })
    }

    pub fn assertion_response(
        &self,
        rp_id: &str,
        origin: &str,
        challenge: &str,
        sign_count: u32,
        flags: u8,
    ) -> Result<PublicKeyCredential, Error> {
        let auth_data = self.authenticator_data(rp_id, flags, sign_count, None)?;
        let client_data = client_data(WEBAUTHN_REQUEST_TYPE_GET, challenge, origin)?;

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&Sha256::digest(&client_data));
        let signature = self.sign(&signed)?;

        Ok(PublicKeyCredential {
            id: self.credential_id(),
            raw_id: Some(self.credential_id()),
            response: AuthenticatorResponse {
                client_data_json: crate::base64::encode_urlsafe(client_data),
                authenticator_data: Some(crate::base64::encode_urlsafe(auth_data)),
                signature: Some(crate::base64::encode_urlsafe(signature)),
                ..Default::default()
            },
        })
    }

    /// Answers `navigator.credentials.create()` with user presence asserted.
    pub fn register(&self, options: &PublicKeyCredentialCreationOptions, origin: &str) -> Result<PublicKeyCredential, Error> {
        let uv_required = options
            .authenticator_selection
            .as_ref()
            .and_then(|selection| selection.user_verification.as_ref())
            == Some(&UserVerificationRequirement::Required);
        let mut flags = AttestationFlags::UserPresent as u8 | AttestationFlags::AttestedCredentialDataIncluded as u8;
        if uv_required {
            flags |= AttestationFlags::UserVerified as u8;
        }

        let rp_id = options.rp.id.clone().unwrap_or_else(|| get_default_rp_id(origin));
        self.registration_response(&rp_id, origin, &options.challenge, flags)
    }

    /// Answers `navigator.credentials.get()` with user presence asserted.
    pub fn assert(&self, options: &PublicKeyCredentialRequestOptions, origin: &str, sign_count: u32) -> Result<PublicKeyCredential, Error> {
        let mut flags = AttestationFlags::UserPresent as u8;
        if options.user_verification == Some(UserVerificationRequirement::Required) {
            flags |= AttestationFlags::UserVerified as u8;
        }

        let rp_id = options.rp_id.clone().unwrap_or_else(|| get_default_rp_id(origin));
        self.assertion_response(&rp_id, origin, &options.challenge, sign_count, flags)
    }

    /// P-256 signatures come out in the fixed `r || s` form.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        match &self.key {
            CredentialKey::P256(key) => {
                let signature: Signature = key.sign(message);
                Ok(signature.to_bytes().to_vec())
            }
            CredentialKey::Rsa(key) => key
                .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message))
                .map_err(|e| Error::Other(e.to_string())),
        }
    }
}

fn random_credential_id() -> Result<Vec<u8>, Error> {
    let mut id = vec![0u8; CREDENTIAL_ID_LENGTH];
    SystemRandom::new().fill(&mut id)?;
    Ok(id)
}

fn client_data(request_type: &str, challenge: &str, origin: &str) -> Result<Vec<u8>, Error> {
    let client_data = CollectedClientData {
        request_type: request_type.to_string(),
        challenge: challenge.to_string(),
        origin: origin.to_string(),
        cross_origin: false,
    };

    Ok(serde_json::to_vec(&client_data)?)
}

fn find_best_supported_algorithm(pub_key_cred_params: &[PublicKeyCredentialParameters]) -> Result<i64, Error> {
    // ES256 over RS256
    [COSE_ALGORITHM_IDENTIFIER_ES256, COSE_ALGORITHM_IDENTIFIER_RS256]
        .into_iter()
        .find(|alg| pub_key_cred_params.iter().any(|param| param.alg == *alg))
        .ok_or_else(|| Error::UnsupportedAlgorithm("no supported algorithm offered".to_string()))
}
