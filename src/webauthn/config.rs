use crate::webauthn::{
    error::Error,
    proto::{
        constants::{WEBAUTHN_DEFAULT_CHALLENGE_TTL_SECS, WEBAUTHN_DEFAULT_TIMEOUT_MS},
        web_message::get_default_rp_id,
    },
};
use serde_derive::*;
use std::fmt::{Display, Formatter};

/// The two populations served by one engine instance.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubjectClass {
    Workforce,
    Customer,
}

impl Display for SubjectClass {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        match self {
            SubjectClass::Workforce => write!(f, "workforce"),
            SubjectClass::Customer => write!(f, "customer"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(from = "RelyingPartyFields")]
pub struct RelyingParty {
    /// Effective domain. Derived from `origin` when left empty.
    pub id: String,
    pub name: String,
    /// Compared byte for byte with the origin reported in client data.
    pub origin: String,
}

impl RelyingParty {
    pub fn new(name: impl Into<String>, origin: impl Into<String>, id: Option<String>) -> Self {
        let origin = origin.into();
        let id = id.filter(|id| !id.is_empty()).unwrap_or_else(|| get_default_rp_id(&origin));
        RelyingParty {
            id,
            name: name.into(),
            origin,
        }
    }

    fn resolve_id(&mut self) {
        if self.id.is_empty() {
            self.id = get_default_rp_id(&self.origin);
        }
    }
}

#[derive(Deserialize)]
struct RelyingPartyFields {
    #[serde(default)]
    id: Option<String>,
    name: String,
    origin: String,
}

impl From<RelyingPartyFields> for RelyingParty {
    fn from(fields: RelyingPartyFields) -> Self {
        RelyingParty::new(fields.name, fields.origin, fields.id)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct WebauthnConfig {
    pub workforce: RelyingParty,
    pub customer: RelyingParty,
    #[serde(default = "default_challenge_ttl_secs")]
    pub challenge_ttl_secs: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_challenge_ttl_secs() -> i64 {
    WEBAUTHN_DEFAULT_CHALLENGE_TTL_SECS
}

fn default_timeout_ms() -> u64 {
    WEBAUTHN_DEFAULT_TIMEOUT_MS
}

impl WebauthnConfig {
    pub fn builder() -> WebauthnConfigBuilder {
        WebauthnConfigBuilder::new()
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn relying_party(&self, class: SubjectClass) -> &RelyingParty {
        match class {
            SubjectClass::Workforce => &self.workforce,
            SubjectClass::Customer => &self.customer,
        }
    }

    pub fn challenge_ttl(&self) -> time::Duration {
        time::Duration::seconds(self.challenge_ttl_secs)
    }
}

pub struct WebauthnConfigBuilder {
    workforce: Option<RelyingParty>,
    customer: Option<RelyingParty>,
    challenge_ttl_secs: Option<i64>,
    timeout_ms: Option<u64>,
}

impl WebauthnConfigBuilder {
    pub fn new() -> Self {
        WebauthnConfigBuilder {
            workforce: None,
            customer: None,
            challenge_ttl_secs: None,
            timeout_ms: None,
        }
    }

    pub fn workforce(mut self, rp: RelyingParty) -> Self {
        self.workforce = Some(rp);
        self
    }

    pub fn customer(mut self, rp: RelyingParty) -> Self {
        self.customer = Some(rp);
        self
    }

    pub fn challenge_ttl_secs(mut self, ttl: i64) -> Self {
        self.challenge_ttl_secs = Some(ttl);
        self
    }

    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = Some(timeout);
        self
    }

    pub fn build(self) -> Result<WebauthnConfig, Error> {
        let WebauthnConfigBuilder {
            workforce,
            customer,
            challenge_ttl_secs,
            timeout_ms,
        } = self;

        let mut workforce = workforce.ok_or_else(|| Error::Other("Unable to build a config without a workforce relying party".to_string()))?;
        let mut customer = customer.ok_or_else(|| Error::Other("Unable to build a config without a customer relying party".to_string()))?;
        workforce.resolve_id();
        customer.resolve_id();

        Ok(WebauthnConfig {
            workforce,
            customer,
            challenge_ttl_secs: challenge_ttl_secs.unwrap_or(WEBAUTHN_DEFAULT_CHALLENGE_TTL_SECS),
            timeout_ms: timeout_ms.unwrap_or(WEBAUTHN_DEFAULT_TIMEOUT_MS),
        })
    }
}

impl Default for WebauthnConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_config_from_json() {
    let config = WebauthnConfig::from_json(
        r#"{
            "workforce": { "name": "Admin", "origin": "https://admin.example.com" },
            "customer": { "id": "example.com", "name": "Example", "origin": "https://app.example.com:8443" }
        }"#,
    )
    .unwrap();

    assert_eq!(config.workforce.id, "admin.example.com");
    assert_eq!(config.relying_party(SubjectClass::Customer).id, "example.com");
    assert_eq!(config.relying_party(SubjectClass::Customer).origin, "https://app.example.com:8443");
    assert_eq!(config.challenge_ttl_secs, 300);
    assert_eq!(config.timeout_ms, 300_000);
}

#[test]
fn test_config_builder() {
    let config = WebauthnConfig::builder()
        .workforce(RelyingParty::new("Admin", "http://localhost:3000", None))
        .customer(RelyingParty::new("Shop", "http://localhost:4000", Some("localhost".to_string())))
        .challenge_ttl_secs(60)
        .build()
        .unwrap();

    assert_eq!(config.workforce.id, "localhost");
    assert_eq!(config.challenge_ttl(), time::Duration::seconds(60));
    assert_eq!(config.workforce.id, config.customer.id);

    assert!(WebauthnConfig::builder().build().is_err());
}

#[test]
fn test_config_from_value_resolves_id() {
    let config: WebauthnConfig = serde_json::from_value(serde_json::json!({
        "workforce": { "name": "Admin", "origin": "https://admin.example.com:8443" },
        "customer": { "id": "", "name": "Shop", "origin": "https://shop.example.com" },
        "timeout_ms": 60000
    }))
    .unwrap();

    assert_eq!(config.workforce.id, "admin.example.com");
    assert_eq!(config.customer.id, "shop.example.com");
    assert_eq!(config.timeout_ms, 60_000);

    let rp: RelyingParty = serde_json::from_str(&serde_json::to_string(&config.workforce).unwrap()).unwrap();
    assert_eq!(rp, config.workforce);
}
