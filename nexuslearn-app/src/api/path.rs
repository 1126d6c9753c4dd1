use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use nexuslearn_core::CoreError;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::error::ApiError;

/// `Path` whose rejection renders like every other API error. An id that
/// does not parse cannot name a stored document, so it is a 404.
pub struct IdPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for IdPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(v)) => Ok(IdPath(v)),
            Err(e) => {
                debug!(path = %parts.uri.path(), "unusable id in path: {e}");
                Err(CoreError::NotFound("resource").into())
            }
        }
    }
}
