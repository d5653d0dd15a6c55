//! Custom Axum extractors

use crate::models::User;
use crate::Error;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// The acting user, placed in the request extensions by the authentication
/// layer in front of this service. Requests without one are rejected with 401.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| Error::Unauthorized("no authenticated user".to_string()))
    }
}
