use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::{
    Filter, Rejection,
    filters::header::headers_cloned,
    http::header::{self, HeaderMap},
};

use crate::error::Error;

/// Issuer the access tokens are signed with by the account service.
pub const TOKEN_ISSUER: &str = "videobroker-access";

const JWT_BEARER_PREFIX: &str = "Bearer ";

/// Struct encoded in the JWT that contains its expiry and subject user.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    iat: usize,
    exp: usize,
}

/// Warp filter for requests that require a logged in user provided by the auth header.
pub fn with_user(jwt_secret: Arc<str>) -> impl Filter<Extract = (Uuid,), Error = Rejection> + Clone {
    headers_cloned()
        .and(warp::any().map(move || jwt_secret.clone()))
        .and_then(require_user_from_auth_header)
}

async fn require_user_from_auth_header(
    header_map: HeaderMap,
    jwt_secret: Arc<str>,
) -> Result<Uuid, Rejection> {
    let token = get_bearer_token(&header_map)?;
    resolve_user(token, jwt_secret.as_bytes()).map_err(warp::reject::custom)
}

/// Extracts the raw JWT from the `Authorization: Bearer <token>` header.
pub fn get_bearer_token(header_map: &HeaderMap) -> Result<&str, Error> {
    let auth_header = header_map
        .get(header::AUTHORIZATION)
        .ok_or(Error::MissingAuthHeaderError)?;
    let auth_header =
        std::str::from_utf8(auth_header.as_bytes()).map_err(|_| Error::UtfEncodingError)?;

    auth_header
        .strip_prefix(JWT_BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(Error::InvalidAuthHeaderError)
}

/// Validates the signature, issuer and expiry of the token and returns the id of the subject user.
pub fn resolve_user(token: &str, secret: &[u8]) -> Result<Uuid, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);

    // fails if expired
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| {
            log::debug!("Rejecting JWT: {e}");
            Error::InvalidJwtError
        })?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| Error::InvalidJwtError)
}

#[cfg(test)]
pub(crate) fn create_access_token(user_id: Uuid, secret: &[u8], expires_in: chrono::Duration) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let now = chrono::Utc::now();
    let claims = Claims {
        iss: String::from(TOKEN_ISSUER),
        sub: user_id.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + expires_in).timestamp() as usize,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .expect("failed to encode test token")
}
