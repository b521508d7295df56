use std::net::SocketAddr;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::limiter::{CallerClass, CallerIdentity};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Maps a request to the identity its quota is counted against.
///
/// A valid bearer token yields `user:{sub}`; anything else, including a bad
/// token, falls back to the client address as `ip:{addr}`.
#[derive(Clone)]
pub struct IdentityResolver {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl IdentityResolver {
    pub fn new(jwt_secret: Option<&str>) -> Self {
        Self {
            key: jwt_secret.map(|secret| DecodingKey::from_secret(secret.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> CallerIdentity {
        if let Some(claims) = self.verified_claims(headers) {
            let class = match claims.role.as_deref() {
                Some("admin") => CallerClass::Admin,
                _ => CallerClass::Authenticated,
            };
            return CallerIdentity::new(format!("user:{}", claims.sub), class);
        }
        CallerIdentity::anonymous(format!("ip:{}", client_ip(headers, peer)))
    }

    fn verified_claims(&self, headers: &HeaderMap) -> Option<Claims> {
        let key = self.key.as_ref()?;
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))?;

        match decode::<Claims>(token.trim(), key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring invalid bearer token");
                None
            }
        }
    }
}

/// Client address: `x-real-ip`, then the first non-empty `x-forwarded-for`
/// entry, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| headers.get(name).and_then(|h| h.to_str().ok());

    header("x-real-ip")
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
                .map(str::to_string)
        })
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
