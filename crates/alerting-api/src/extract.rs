//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::proxy::forwardable_headers;

/// Header carrying the organisation of a request.
pub const ORG_ID_HEADER: &str = "x-org-id";

/// Organisation used when the header is absent.
pub const DEFAULT_ORG_ID: i64 = 1;

/// Per-request context: the caller's organisation and the headers that may
/// be forwarded to a proxied backend.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Organisation of the caller.
    pub org_id: i64,
    /// Caller headers with credentials removed.
    pub forward_headers: HeaderMap,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let org_id = match parts.headers.get(ORG_ID_HEADER) {
            None => DEFAULT_ORG_ID,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|id| *id > 0)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid {ORG_ID_HEADER} header")))?,
        };
        Ok(Self {
            org_id,
            forward_headers: forwardable_headers(&parts.headers),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(org: Option<&str>) -> Result<RequestContext, ApiError> {
        let mut builder = Request::builder().uri("/").header("authorization", "Bearer t");
        if let Some(org) = org {
            builder = builder.header(ORG_ID_HEADER, org);
        }
        let (mut parts, ()) = builder.body(()).expect("request").into_parts();
        RequestContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn defaults_to_org_one() {
        let ctx = extract(None).await.expect("context");
        assert_eq!(ctx.org_id, DEFAULT_ORG_ID);
        assert!(ctx.forward_headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn reads_header() {
        assert_eq!(extract(Some("7")).await.expect("context").org_id, 7);
    }

    #[tokio::test]
    async fn rejects_garbage() {
        assert!(matches!(extract(Some("abc")).await, Err(ApiError::BadRequest(_))));
        assert!(extract(Some("0")).await.is_err());
    }
}
