//! Cart identity resolution and request extractors.
//!
//! Every cart endpoint first needs a stable cart identifier. Authenticated
//! callers use their verified subject claim (injected by the fronting
//! authorizer as a header), which binds the cart permanently to the
//! account. Anonymous callers present an opaque token via the `x-cart-id`
//! header or the `cart_id` cookie; the header takes precedence. When
//! neither is present a fresh token is generated and must be surfaced back
//! to the caller via a cookie, or the cart becomes unreachable.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use axum::Json;
use serde_json::json;

use cartage_core::{CartId, UserId};

/// Header carrying the gateway-verified authenticated subject.
pub const AUTH_SUBJECT_HEADER: &str = "x-auth-subject";

/// Header carrying an anonymous cart token.
pub const CART_TOKEN_HEADER: &str = "x-cart-id";

/// Cookie name carrying an anonymous cart token.
pub const CART_COOKIE: &str = "cart_id";

/// A resolved cart identity.
#[derive(Debug, Clone)]
pub struct CartIdentity {
    /// The cart's partition key: the subject for authenticated callers, an
    /// opaque token otherwise.
    pub cart_id: CartId,
    /// The authenticated account, when present.
    pub user_id: Option<UserId>,
    /// True when the token was generated during this request and therefore
    /// must be propagated back to the caller.
    pub freshly_issued: bool,
}

impl CartIdentity {
    /// Resolve an identity from an optional authenticated subject and an
    /// optional client-presented token. Always succeeds.
    #[must_use]
    pub fn resolve(subject: Option<&str>, token: Option<&str>) -> Self {
        if let Some(subject) = subject {
            return Self {
                cart_id: CartId::new(subject),
                user_id: Some(UserId::new(subject)),
                freshly_issued: false,
            };
        }
        token.map_or_else(
            || Self {
                cart_id: CartId::generate(),
                user_id: None,
                freshly_issued: true,
            },
            |token| Self {
                cart_id: CartId::new(token),
                user_id: None,
                freshly_issued: false,
            },
        )
    }

    /// Whether this identity belongs to an authenticated account.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_owned())
    })
}

fn presented_token(parts: &Parts) -> Option<String> {
    header_value(parts, CART_TOKEN_HEADER)
        .map(ToOwned::to_owned)
        .or_else(|| cookie_value(parts, CART_COOKIE))
}

/// Extractor that always yields a cart identity, generating a fresh token
/// when the caller presented none. Used by create-or-get and add-item.
pub struct CartContext(pub CartIdentity);

impl<S> FromRequestParts<S> for CartContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = header_value(parts, AUTH_SUBJECT_HEADER);
        let token = presented_token(parts);
        Ok(Self(CartIdentity::resolve(subject, token.as_deref())))
    }
}

/// Extractor that yields a cart identity only when the caller presented
/// one. Used by reads, where an unknown caller gets an empty cart.
pub struct MaybeCart(pub Option<CartIdentity>);

impl<S> FromRequestParts<S> for MaybeCart
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = header_value(parts, AUTH_SUBJECT_HEADER);
        let token = presented_token(parts);
        if subject.is_none() && token.is_none() {
            return Ok(Self(None));
        }
        Ok(Self(Some(CartIdentity::resolve(subject, token.as_deref()))))
    }
}

/// Extractor that requires an existing cart context; rejects with 400
/// otherwise. Used by set-quantity and clear.
pub struct RequireCart(pub CartIdentity);

/// Rejection for [`RequireCart`].
pub struct NoCartContext;

impl IntoResponse for NoCartContext {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "No cart context" }))).into_response()
    }
}

impl<S> FromRequestParts<S> for RequireCart
where
    S: Send + Sync,
{
    type Rejection = NoCartContext;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = header_value(parts, AUTH_SUBJECT_HEADER);
        let token = presented_token(parts);
        if subject.is_none() && token.is_none() {
            return Err(NoCartContext);
        }
        Ok(Self(CartIdentity::resolve(subject, token.as_deref())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/cart");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn subject_wins_over_tokens() {
        let identity = CartIdentity::resolve(Some("user-1"), Some("tok-1"));
        assert_eq!(identity.cart_id, CartId::new("user-1"));
        assert_eq!(identity.user_id, Some(UserId::new("user-1")));
        assert!(identity.is_authenticated());
        assert!(!identity.freshly_issued);
    }

    #[test]
    fn presented_token_is_reused() {
        let identity = CartIdentity::resolve(None, Some("tok-1"));
        assert_eq!(identity.cart_id, CartId::new("tok-1"));
        assert!(!identity.is_authenticated());
        assert!(!identity.freshly_issued);
    }

    #[test]
    fn missing_token_generates_fresh() {
        let identity = CartIdentity::resolve(None, None);
        assert!(!identity.cart_id.is_empty());
        assert!(identity.freshly_issued);
    }

    #[tokio::test]
    async fn header_takes_precedence_over_cookie() {
        let mut parts = parts(&[
            (CART_TOKEN_HEADER, "from-header"),
            ("cookie", "cart_id=from-cookie; other=x"),
        ]);
        let CartContext(identity) = CartContext::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(identity.cart_id, CartId::new("from-header"));
    }

    #[tokio::test]
    async fn cookie_is_used_when_header_absent() {
        let mut parts = parts(&[("cookie", "a=b; cart_id=tok-9")]);
        let CartContext(identity) = CartContext::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(identity.cart_id, CartId::new("tok-9"));
    }

    #[tokio::test]
    async fn require_cart_rejects_without_context() {
        let mut parts = parts(&[]);
        assert!(
            RequireCart::from_request_parts(&mut parts, &())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn maybe_cart_is_none_without_context() {
        let mut parts = parts(&[]);
        let MaybeCart(identity) = MaybeCart::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(identity.is_none());
    }
}
