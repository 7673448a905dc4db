#[cfg(feature = "authenticator")]
pub mod authenticator;
pub mod challenge;
pub mod config;
pub mod error;
pub mod proto;
pub mod server;
pub mod signature;
pub mod store;

pub use self::{
    challenge::ChallengeMetadata,
    config::{RelyingParty, SubjectClass, WebauthnConfig},
    error::{Error, ErrorKind},
    server::{WebauthnServer, WebauthnUser},
    store::{ChallengeStore, Credential, CredentialStore, MemoryChallengeStore, MemoryCredentialStore},
};
