use std::{
    sync::OnceLock,
    time::{Duration, SystemTime},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{
    jwk::{
        AlgorithmParameters, CommonParameters, Jwk, JwkSet, KeyAlgorithm, RSAKeyParameters,
        RSAKeyType,
    },
    Algorithm, EncodingKey, Header,
};
use serde_json::Value;
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const AUDIENCE: &str = "https://casting.agency/api";

/// RSA key pair generated once per test binary.
pub struct TestKey {
    private_der: Vec<u8>,
    n: String,
    e: String,
}

impl TestKey {
    fn generate() -> Self {
        let rsa_private_key = openssl::rsa::Rsa::generate(2048).unwrap();
        TestKey {
            private_der: rsa_private_key.private_key_to_der().unwrap(),
            n: URL_SAFE_NO_PAD.encode(rsa_private_key.n().to_vec()),
            e: URL_SAFE_NO_PAD.encode(rsa_private_key.e().to_vec()),
        }
    }

    pub fn primary() -> &'static TestKey {
        static KEY: OnceLock<TestKey> = OnceLock::new();
        KEY.get_or_init(TestKey::generate)
    }

    pub fn secondary() -> &'static TestKey {
        static KEY: OnceLock<TestKey> = OnceLock::new();
        KEY.get_or_init(TestKey::generate)
    }

    pub fn sign(&self, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        jsonwebtoken::encode(
            &header,
            claims,
            &EncodingKey::from_rsa_der(&self.private_der),
        )
        .unwrap()
    }
}

pub fn rsa_jwk(kid: &str, key: &TestKey) -> Jwk {
    Jwk {
        common: CommonParameters {
            key_algorithm: Some(KeyAlgorithm::RS256),
            key_id: Some(kid.to_string()),
            ..CommonParameters::default()
        },
        algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
            n: key.n.clone(),
            e: key.e.clone(),
            key_type: RSAKeyType::RSA,
        }),
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// HS256 token signed with a shared secret, for algorithm confusion scenarios.
pub fn hs256_token(kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(b"shared-secret")).unwrap()
}

/// Identity provider double publishing a JWK set with the primary test key under kid `42`.
pub struct MockIdentityProvider {
    server: MockServer,
    issuer: String,
}

impl MockIdentityProvider {
    pub const KID: &'static str = "42";

    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let jwks = JwkSet {
            keys: vec![rsa_jwk(Self::KID, TestKey::primary())],
        };
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .mount(&server)
            .await;
        let issuer = format!("{}/", server.uri());
        Self { server, issuer }
    }

    pub fn domain(&self) -> String {
        self.server.uri()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn jwks_url(&self) -> Url {
        Url::parse(&self.issuer).unwrap().join(".well-known/jwks.json").unwrap()
    }

    /// Claims accepted by the provider's issuer and [`AUDIENCE`], valid for an hour.
    pub fn claims(&self, permissions: &[&str]) -> Value {
        let issued_at = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap();
        let expires_at = issued_at + Duration::from_secs(3600);
        serde_json::json!({
            "sub": "auth0|casting-director",
            "iss": self.issuer,
            "aud": [AUDIENCE, format!("{}userinfo", self.issuer)],
            "iat": issued_at.as_secs(),
            "exp": expires_at.as_secs(),
            "azp": "casting-agency-spa",
            "permissions": permissions,
        })
    }

    pub fn token(&self, permissions: &[&str]) -> String {
        TestKey::primary().sign(Some(Self::KID), &self.claims(permissions))
    }
}
