use crate::webauthn::proto::cbor::CborError;
use base64::DecodeError;
use ring::error::Unspecified;
use serde_json::Error as JsonError;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io::Error as IoError;

/// Coarse classification callers use to decide how to react to a failed ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Terminal, no retry.
    Validation,
    /// Challenge missing, expired or already used. The ceremony must restart from options.
    Challenge,
    /// Binding mismatch or bad signature. Security relevant.
    Signature,
    /// Non-increasing signature counter. Possible cloned authenticator.
    Replay,
    /// Authenticator outside the supported key types or CBOR subset.
    UnsupportedAlgorithm,
    /// The persistence collaborator or the system random source failed.
    Internal,
}

#[derive(Debug)]
pub enum Error {
    IoError(IoError),
    Base64Error(DecodeError),
    CborError(CborError),
    JsonError(JsonError),
    RingError(Unspecified),
    ChallengeError(ChallengeError),
    CredentialError(CredentialError),
    ReplayError { stored: u32, received: u32 },
    UnsupportedAlgorithm(String),
    StorageError(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    RequestType,
    Challenge,
    Origin,
    Rpid,
    UserPresentFlag,
    AttestationMissing,
    AuthenticatorDataMissing,
    SignatureMissing,
    Signature,
    CredentialNotFound,
    CredentialOwner,
    Other(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IoError(_) | Error::Base64Error(_) | Error::JsonError(_) | Error::Other(_) => ErrorKind::Validation,
            Error::CborError(e) if e.is_unsupported() => ErrorKind::UnsupportedAlgorithm,
            Error::CborError(_) => ErrorKind::Validation,
            Error::RingError(_) | Error::StorageError(_) => ErrorKind::Internal,
            Error::ChallengeError(_) => ErrorKind::Challenge,
            Error::CredentialError(e) => match e {
                CredentialError::RequestType
                | CredentialError::AttestationMissing
                | CredentialError::AuthenticatorDataMissing
                | CredentialError::SignatureMissing
                | CredentialError::Other(_) => ErrorKind::Validation,
                CredentialError::Challenge
                | CredentialError::Origin
                | CredentialError::Rpid
                | CredentialError::UserPresentFlag
                | CredentialError::Signature
                | CredentialError::CredentialNotFound
                | CredentialError::CredentialOwner => ErrorKind::Signature,
            },
            Error::ReplayError { .. } => ErrorKind::Replay,
            Error::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::IoError(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Base64Error(e)
    }
}

impl From<CborError> for Error {
    fn from(e: CborError) -> Self {
        Error::CborError(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Self {
        Error::JsonError(e)
    }
}

impl From<Unspecified> for Error {
    fn from(e: Unspecified) -> Self {
        Error::RingError(e)
    }
}

impl From<ChallengeError> for Error {
    fn from(e: ChallengeError) -> Self {
        Error::ChallengeError(e)
    }
}

impl From<CredentialError> for Error {
    fn from(e: CredentialError) -> Self {
        Error::CredentialError(e)
    }
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        use Error::*;
        match self {
            IoError(io_e) => io_e.fmt(f),
            Base64Error(e) => e.fmt(f),
            CborError(cb_e) => cb_e.fmt(f),
            JsonError(js_e) => js_e.fmt(f),
            RingError(r_e) => r_e.fmt(f),
            ChallengeError(c_e) => c_e.fmt(f),
            CredentialError(c_e) => c_e.fmt(f),
            ReplayError { stored, received } => write!(
                f,
                "Signature counter did not increase (stored {}, received {}), authenticator may be cloned",
                stored, received
            ),
            UnsupportedAlgorithm(s) => write!(f, "Unsupported algorithm: {}", s),
            StorageError(s) => write!(f, "Storage error: {}", s),
            Other(s) => write!(f, "{}", s),
        }
    }
}

impl Display for ChallengeError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        match self {
            ChallengeError::NotFound => write!(f, "No live challenge found (expired, consumed or never issued)"),
        }
    }
}

impl Display for CredentialError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        use CredentialError::*;
        match self {
            RequestType => write!(f, "Wrong request type"),
            Challenge => write!(f, "Challenges do not match"),
            Origin => write!(f, "Wrong origin"),
            Rpid => write!(f, "Wrong rp ID"),
            UserPresentFlag => write!(f, "Missing user present flag"),
            AttestationMissing => write!(f, "Missing attested credential data"),
            AuthenticatorDataMissing => write!(f, "Missing authenticator data"),
            SignatureMissing => write!(f, "Missing signature"),
            Signature => write!(f, "Signature verification failed"),
            CredentialNotFound => write!(f, "Unknown credential"),
            CredentialOwner => write!(f, "Credential does not belong to this subject"),
            Other(s) => write!(f, "{}", s),
        }
    }
}

#[test]
fn test_error_kinds() {
    assert_eq!(Error::from(CborError::UnsupportedType(4)).kind(), ErrorKind::UnsupportedAlgorithm);
    assert_eq!(Error::from(CborError::UnexpectedEof).kind(), ErrorKind::Validation);
    assert_eq!(Error::from(ChallengeError::NotFound).kind(), ErrorKind::Challenge);
    assert_eq!(Error::from(CredentialError::Origin).kind(), ErrorKind::Signature);
    assert_eq!(Error::from(CredentialError::RequestType).kind(), ErrorKind::Validation);
    assert_eq!(Error::ReplayError { stored: 5, received: 5 }.kind(), ErrorKind::Replay);
    assert_eq!(Error::UnsupportedAlgorithm("kty 1".to_string()).kind(), ErrorKind::UnsupportedAlgorithm);
}
