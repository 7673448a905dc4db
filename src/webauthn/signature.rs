use crate::webauthn::error::{CredentialError, Error};
use p256::{
    ecdsa::{signature::Verifier, Signature as EcdsaSignature, VerifyingKey},
    pkcs8::DecodePublicKey as _,
};
use rsa::{pkcs8::DecodePublicKey as _, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Verifies `signature` over `message` with a DER SubjectPublicKeyInfo.
///
/// P-256 ECDSA is tried first with a fixed length `r || s` signature, then with an
/// ASN.1 encoded one, then RSA PKCS#1 v1.5 with SHA-256.
pub fn verify_signature(public_key_der: &[u8], message: &[u8], signature: &[u8]) -> Result<(), Error> {
    if verify_p256(public_key_der, message, signature) || verify_rsa(public_key_der, message, signature) {
        return Ok(());
    }

    Err(CredentialError::Signature.into())
}

fn verify_p256(public_key_der: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_public_key_der(public_key_der) else {
        return false;
    };

    let fixed = EcdsaSignature::from_slice(signature).map(|sig| key.verify(message, &sig).is_ok());
    if let Ok(true) = fixed {
        return true;
    }

    EcdsaSignature::from_der(signature)
        .map(|sig| key.verify(message, &sig).is_ok())
        .unwrap_or(false)
}

fn verify_rsa(public_key_der: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = RsaPublicKey::from_public_key_der(public_key_der) else {
        return false;
    };

    let hashed = Sha256::digest(message);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), hashed.as_slice(), signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::error::ErrorKind;
    use p256::{
        ecdsa::{signature::Signer, SigningKey},
        pkcs8::EncodePublicKey as _,
    };
    use rsa::{pkcs8::EncodePublicKey as _, RsaPrivateKey};

    const MESSAGE: &[u8] = b"authenticator data || client data hash";

    fn p256_key() -> (SigningKey, Vec<u8>) {
        let signing_key = SigningKey::from_slice(&[0x17; 32]).unwrap();
        let der = signing_key.verifying_key().to_public_key_der().unwrap().as_bytes().to_vec();
        (signing_key, der)
    }

    #[test]
    fn test_p256_fixed_length_signature() {
        let (signing_key, der) = p256_key();
        let signature: EcdsaSignature = signing_key.sign(MESSAGE);
        let raw = signature.to_bytes();
        assert_eq!(raw.len(), 64);

        assert!(verify_signature(&der, MESSAGE, &raw).is_ok());
        assert!(verify_signature(&der, b"something else", &raw).is_err());
    }

    #[test]
    fn test_p256_der_signature() {
        let (signing_key, der) = p256_key();
        let signature: EcdsaSignature = signing_key.sign(MESSAGE);

        assert!(verify_signature(&der, MESSAGE, signature.to_der().as_bytes()).is_ok());
    }

    #[test]
    fn test_rsa_fallback() {
        let mut rng = rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let der = private_key.to_public_key().to_public_key_der().unwrap().as_bytes().to_vec();

        let hashed = Sha256::digest(MESSAGE);
        let signature = private_key.sign(Pkcs1v15Sign::new::<Sha256>(), hashed.as_slice()).unwrap();

        assert!(verify_signature(&der, MESSAGE, &signature).is_ok());

        let mut tampered = signature.clone();
        tampered[10] ^= 0x01;
        assert!(verify_signature(&der, MESSAGE, &tampered).is_err());
    }

    #[test]
    fn test_garbage_key_rejected() {
        let err = verify_signature(&[0x30, 0x00], MESSAGE, &[0u8; 64]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signature);
    }
}
