use crate::webauthn::{
    error::{CredentialError, Error},
    proto::{
        cbor::{CborError, Decoder, Value},
        constants::{
            WEBAUTHN_AAGUID_LENGTH, WEBAUTHN_ATTESTED_CREDENTIAL_DATA_FLAG, WEBAUTHN_EXTENSION_DATA_FLAG, WEBAUTHN_RP_ID_HASH_LENGTH,
            WEBAUTHN_USER_PRESENT_FLAG, WEBAUTHN_USER_VERIFIED_FLAG,
        },
    },
};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use uuid::Uuid;

pub trait Message {
    fn from_bytes(raw_values: &[u8]) -> Result<Self, Error>
    where
        Self: Sized;

    fn from_base64(string: &str) -> Result<Self, Error>
    where
        Self: Sized,
    {
        let raw_values = crate::base64::decode_urlsafe(string)?;
        Self::from_bytes(raw_values.as_slice())
    }
}

#[derive(Clone, Debug)]
pub struct AttestationObject {
    pub auth_data: AuthenticatorData,
    pub raw_auth_data: Vec<u8>,
    pub fmt: String,
}

#[derive(Clone, Debug)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; WEBAUTHN_RP_ID_HASH_LENGTH],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
}

#[derive(Clone, Debug)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; WEBAUTHN_AAGUID_LENGTH],
    pub credential_id: Vec<u8>,
    /// Left undecoded as a COSE map until the ceremony asks for the DER form.
    pub credential_public_key: Value,
}

impl AttestedCredentialData {
    /// AAGUID formatted as `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
    pub fn aaguid_string(&self) -> String {
        Uuid::from_bytes(self.aaguid).hyphenated().to_string()
    }
}

impl AuthenticatorData {
    pub fn user_present(&self) -> bool {
        self.flags & WEBAUTHN_USER_PRESENT_FLAG != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & WEBAUTHN_USER_VERIFIED_FLAG != 0
    }

    pub fn has_attested_credential_data(&self) -> bool {
        self.flags & WEBAUTHN_ATTESTED_CREDENTIAL_DATA_FLAG != 0
    }

    pub fn has_extension_data(&self) -> bool {
        self.flags & WEBAUTHN_EXTENSION_DATA_FLAG != 0
    }
}

impl Message for AuthenticatorData {
    fn from_bytes(raw_values: &[u8]) -> Result<Self, Error> {
        let mut cursor = Cursor::new(raw_values);

        let mut rp_id_hash = [0u8; WEBAUTHN_RP_ID_HASH_LENGTH];
        cursor.read_exact(&mut rp_id_hash)?;

        let flags = cursor.read_u8()?;

        let sign_count = cursor.read_u32::<BigEndian>()?;

        let credential_header = if flags & WEBAUTHN_ATTESTED_CREDENTIAL_DATA_FLAG != 0 {
            let mut aaguid = [0u8; WEBAUTHN_AAGUID_LENGTH];
            cursor.read_exact(&mut aaguid)?;

            let length = cursor.read_u16::<BigEndian>()?;

            let mut credential_id = vec![0u8; length as usize];
            cursor.read_exact(&mut credential_id[..])?;

            Some((aaguid, credential_id))
        } else {
            None
        };

        let mut decoder = Decoder::new(&raw_values[cursor.position() as usize..]);

        let attested_credential_data = match credential_header {
            Some((aaguid, credential_id)) => Some(AttestedCredentialData {
                aaguid,
                credential_id,
                credential_public_key: decoder.read_value()?,
            }),
            None => None,
        };

        // Extension outputs are not interpreted.
        if flags & WEBAUTHN_EXTENSION_DATA_FLAG != 0 {
            decoder.skip_value()?;
        }

        if decoder.remaining() != 0 {
            return Err(CborError::TrailingBytes(decoder.remaining()).into());
        }

        Ok(AuthenticatorData {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential_data,
        })
    }
}

impl Message for AttestationObject {
    fn from_bytes(raw_values: &[u8]) -> Result<Self, Error> {
        let mut decoder = Decoder::new(raw_values);
        let entries = decoder.read_map_len()?;

        let mut fmt = None;
        let mut raw_auth_data = None;
        for _ in 0..entries {
            match decoder.read_text()?.as_str() {
                "fmt" => fmt = Some(decoder.read_text()?),
                "authData" => raw_auth_data = Some(decoder.read_bytes()?),
                // attStmt is never validated, see crate docs
                _ => decoder.skip_value()?,
            }
        }

        if decoder.remaining() != 0 {
            return Err(CborError::TrailingBytes(decoder.remaining()).into());
        }

        let raw_auth_data = raw_auth_data.ok_or(CredentialError::AuthenticatorDataMissing)?;
        let fmt = fmt.ok_or_else(|| Error::Other("Attestation object has no fmt".to_string()))?;

        Ok(AttestationObject {
            auth_data: AuthenticatorData::from_bytes(raw_auth_data.as_slice())?,
            raw_auth_data,
            fmt,
        })
    }
}
