//#![deny(warnings)]

//! # Passkey RP
//!
//! WebAuthn relying-party engine serving two subject populations (workforce and
//! tenant customers) from a single instance.
//!
//! Only the `none` attestation format is supported. Attestation statements are never
//! validated, so authenticator provenance is not established by this crate.

pub mod base64;

pub mod webauthn;
