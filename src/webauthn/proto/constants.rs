pub const WEBAUTHN_CHALLENGE_LENGTH: usize = 32;
pub const WEBAUTHN_AAGUID_LENGTH: usize = 16;
pub const WEBAUTHN_RP_ID_HASH_LENGTH: usize = 32;

pub const WEBAUTHN_USER_PRESENT_FLAG: u8 = 0b00000001;
pub const WEBAUTHN_USER_VERIFIED_FLAG: u8 = 0b00000100;
pub const WEBAUTHN_ATTESTED_CREDENTIAL_DATA_FLAG: u8 = 0b01000000;
pub const WEBAUTHN_EXTENSION_DATA_FLAG: u8 = 0b10000000;

pub const WEBAUTHN_FORMAT_NONE: &str = "none";

pub const WEBAUTHN_REQUEST_TYPE_CREATE: &str = "webauthn.create";
pub const WEBAUTHN_REQUEST_TYPE_GET: &str = "webauthn.get";

pub const WEBAUTHN_DEFAULT_TIMEOUT_MS: u64 = 300_000;
pub const WEBAUTHN_DEFAULT_CHALLENGE_TTL_SECS: i64 = 300;

// COSE key parameters, https://www.iana.org/assignments/cose/cose.xhtml#key-common-parameters
pub const COSE_KEY_KTY: i64 = 1;
pub const COSE_KEY_ALG: i64 = 3;
pub const COSE_KEY_EC2_CRV: i64 = -1;
pub const COSE_KEY_EC2_X: i64 = -2;
pub const COSE_KEY_EC2_Y: i64 = -3;
pub const COSE_KEY_RSA_N: i64 = -1;
pub const COSE_KEY_RSA_E: i64 = -2;

pub const WEBAUTH_PUBLIC_KEY_TYPE_EC2: i64 = 2;
pub const WEBAUTH_PUBLIC_KEY_TYPE_RSA: i64 = 3;

pub const COSE_ALGORITHM_IDENTIFIER_ES256: i64 = -7;
pub const COSE_ALGORITHM_IDENTIFIER_RS256: i64 = -257;

pub const ECDSA_CURVE_P256: i64 = 1;
pub const ECDSA_P256_COORDINATE_LENGTH: usize = 32;
