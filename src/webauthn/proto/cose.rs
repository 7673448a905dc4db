//! COSE credential keys and their SubjectPublicKeyInfo (DER) encoding.
//!
//! The DER output is what gets stored alongside a credential and fed back to the
//! signature verifier, so any standard `DecodePublicKey` implementation can read it.

use crate::webauthn::{
    error::Error,
    proto::{
        cbor::Value,
        constants::{
            COSE_KEY_ALG, COSE_KEY_EC2_CRV, COSE_KEY_EC2_X, COSE_KEY_EC2_Y, COSE_KEY_KTY, COSE_KEY_RSA_E, COSE_KEY_RSA_N,
            ECDSA_CURVE_P256, ECDSA_P256_COORDINATE_LENGTH, WEBAUTH_PUBLIC_KEY_TYPE_EC2, WEBAUTH_PUBLIC_KEY_TYPE_RSA,
        },
    },
};
use p256::{elliptic_curve::sec1::FromEncodedPoint, pkcs8::EncodePublicKey as _, EncodedPoint};
use rsa::{pkcs8::EncodePublicKey as _, BigUint, RsaPublicKey};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialPublicKey {
    pub alg: Option<i64>,
    pub key_info: CoseKeyInfo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoseKeyInfo {
    EC2(EC2),
    RSA(Rsa),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EC2 {
    pub curve: i64,
    pub x: [u8; ECDSA_P256_COORDINATE_LENGTH],
    pub y: [u8; ECDSA_P256_COORDINATE_LENGTH],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rsa {
    pub n: Vec<u8>,
    pub e: Vec<u8>,
}

impl CredentialPublicKey {
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        if value.as_map().is_none() {
            return Err(Error::UnsupportedAlgorithm("COSE key is not a map".to_string()));
        }

        let kty = value
            .get_int(COSE_KEY_KTY)
            .and_then(Value::as_integer)
            .ok_or_else(|| Error::UnsupportedAlgorithm("COSE key has no key type".to_string()))?;
        let alg = value.get_int(COSE_KEY_ALG).and_then(Value::as_integer);

        let key_info = match kty {
            WEBAUTH_PUBLIC_KEY_TYPE_EC2 => {
                // A missing curve is read as P-256, the only curve accepted.
                let curve = match value.get_int(COSE_KEY_EC2_CRV) {
                    Some(crv) => crv
                        .as_integer()
                        .ok_or_else(|| Error::UnsupportedAlgorithm("EC2 curve is not an integer".to_string()))?,
                    None => ECDSA_CURVE_P256,
                };
                if curve != ECDSA_CURVE_P256 {
                    return Err(Error::UnsupportedAlgorithm(format!("EC2 curve {}", curve)));
                }

                CoseKeyInfo::EC2(EC2 {
                    curve,
                    x: coordinate(value, COSE_KEY_EC2_X, "x")?,
                    y: coordinate(value, COSE_KEY_EC2_Y, "y")?,
                })
            }
            WEBAUTH_PUBLIC_KEY_TYPE_RSA => CoseKeyInfo::RSA(Rsa {
                n: required_bytes(value, COSE_KEY_RSA_N, "RSA modulus")?.to_vec(),
                e: required_bytes(value, COSE_KEY_RSA_E, "RSA exponent")?.to_vec(),
            }),
            other => return Err(Error::UnsupportedAlgorithm(format!("COSE key type {}", other))),
        };

        Ok(CredentialPublicKey { alg, key_info })
    }

    /// Encodes the key as a DER SubjectPublicKeyInfo. Points off the P-256 curve and
    /// RSA parameters the `rsa` crate refuses are unsupported keys.
    pub fn to_spki_der(&self) -> Result<Vec<u8>, Error> {
        let der = match &self.key_info {
            CoseKeyInfo::EC2(ec2) => {
                let point = EncodedPoint::from_affine_coordinates(&ec2.x.into(), &ec2.y.into(), false);
                let key: Option<p256::PublicKey> = p256::PublicKey::from_encoded_point(&point).into();
                key.ok_or_else(|| Error::UnsupportedAlgorithm("EC2 point is not on the P-256 curve".to_string()))?
                    .to_public_key_der()
            }
            CoseKeyInfo::RSA(rsa) => RsaPublicKey::new(BigUint::from_bytes_be(&rsa.n), BigUint::from_bytes_be(&rsa.e))
                .map_err(|e| Error::UnsupportedAlgorithm(format!("RSA key: {}", e)))?
                .to_public_key_der(),
        }
        .map_err(|e| Error::Other(format!("could not encode public key: {}", e)))?;

        Ok(der.as_bytes().to_vec())
    }
}

fn required_bytes<'a>(value: &'a Value, key: i64, name: &str) -> Result<&'a [u8], Error> {
    value
        .get_int(key)
        .and_then(Value::as_bytes)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("COSE key is missing {} ({})", name, key)))
}

fn coordinate(value: &Value, key: i64, name: &str) -> Result<[u8; ECDSA_P256_COORDINATE_LENGTH], Error> {
    let raw = required_bytes(value, key, name)?;
    raw.try_into()
        .map_err(|_| Error::UnsupportedAlgorithm(format!("EC2 {} coordinate has length {}", name, raw.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::error::ErrorKind;
    use p256::{elliptic_curve::sec1::ToEncodedPoint, pkcs8::DecodePublicKey as _};
    use rsa::{pkcs8::DecodePublicKey as _, traits::PublicKeyParts};

    fn map(entries: Vec<(i64, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (Value::Integer(k), v)).collect())
    }

    #[test]
    fn test_ec2_to_spki() {
        let secret = p256::SecretKey::from_slice(&[0x42; 32]).unwrap();
        let point = secret.public_key().to_encoded_point(false);

        let value = map(vec![
            (1, Value::Integer(2)),
            (3, Value::Integer(-7)),
            (-1, Value::Integer(1)),
            (-2, Value::Bytes(point.x().unwrap().to_vec())),
            (-3, Value::Bytes(point.y().unwrap().to_vec())),
        ]);

        let key = CredentialPublicKey::from_value(&value).unwrap();
        assert_eq!(key.alg, Some(-7));

        let der = key.to_spki_der().unwrap();
        assert_eq!(der.len(), 91);
        let parsed = p256::PublicKey::from_public_key_der(&der).unwrap();
        assert_eq!(parsed, secret.public_key());
    }

    #[test]
    fn test_ec2_missing_coordinate_is_unsupported() {
        let value = map(vec![
            (1, Value::Integer(2)),
            (3, Value::Integer(-7)),
            (-1, Value::Integer(1)),
            (-3, Value::Bytes(vec![0x01; 32])),
        ]);

        let err = CredentialPublicKey::from_value(&value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn test_unknown_key_type_is_unsupported() {
        let okp = map(vec![(1, Value::Integer(1)), (3, Value::Integer(-8))]);
        assert_eq!(CredentialPublicKey::from_value(&okp).unwrap_err().kind(), ErrorKind::UnsupportedAlgorithm);

        let p384 = map(vec![
            (1, Value::Integer(2)),
            (-1, Value::Integer(2)),
            (-2, Value::Bytes(vec![0x01; 48])),
            (-3, Value::Bytes(vec![0x01; 48])),
        ]);
        assert_eq!(CredentialPublicKey::from_value(&p384).unwrap_err().kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn test_rsa_to_spki() {
        // High bit set on the modulus to exercise the DER sign padding.
        let mut n = vec![0xc3; 256];
        n[255] = 0x01;
        let e = vec![0x01, 0x00, 0x01];

        let value = map(vec![
            (1, Value::Integer(3)),
            (3, Value::Integer(-257)),
            (-1, Value::Bytes(n.clone())),
            (-2, Value::Bytes(e.clone())),
        ]);

        let der = CredentialPublicKey::from_value(&value).unwrap().to_spki_der().unwrap();
        let parsed = RsaPublicKey::from_public_key_der(&der).unwrap();
        assert_eq!(parsed.n(), &BigUint::from_bytes_be(&n));
        assert_eq!(parsed.e(), &BigUint::from_bytes_be(&e));
    }

    #[test]
    fn test_ec2_off_curve_is_unsupported() {
        let value = map(vec![
            (1, Value::Integer(2)),
            (3, Value::Integer(-7)),
            (-1, Value::Integer(1)),
            (-2, Value::Bytes(vec![0x11; 32])),
            (-3, Value::Bytes(vec![0x22; 32])),
        ]);

        let key = CredentialPublicKey::from_value(&value).unwrap();
        assert_eq!(key.to_spki_der().unwrap_err().kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn test_rsa_bad_exponent_is_unsupported() {
        let value = map(vec![
            (1, Value::Integer(3)),
            (-1, Value::Bytes(vec![0xc3; 256])),
            (-2, Value::Bytes(vec![0x01])),
        ]);

        let key = CredentialPublicKey::from_value(&value).unwrap();
        assert_eq!(key.to_spki_der().unwrap_err().kind(), ErrorKind::UnsupportedAlgorithm);
    }
}
