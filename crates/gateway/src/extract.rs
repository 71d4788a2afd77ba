//! Request extractors that answer validation failures in the envelope.
//!
//! Input validation runs before the session lookup, so a request that is
//! both malformed and aimed at an unknown session gets the 400.

use {
    axum::{
        Json,
        extract::{FromRequest, FromRequestParts, Query, Request},
        http::request::Parts,
    },
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::Value,
};

use crate::response::Reply;

/// Field-presence check for request bodies.
pub trait Required {
    fn is_complete(&self) -> bool;
}

pub(crate) fn filled(s: &str) -> bool {
    !s.trim().is_empty()
}

/// Present and not `null`, `""`, `[]` or `{}`.
pub(crate) fn filled_value(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => filled(s),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(default)]
    id: String,
}

/// The non-empty `?id=` query parameter naming the target session.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = Reply;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<SessionQuery>::from_request_parts(parts, state)
            .await
            .map_err(|_| Reply::invalid_input())?;
        if !filled(&query.id) {
            return Err(Reply::invalid_input());
        }
        Ok(Self(query.id))
    }
}

/// A JSON body whose required fields are all filled.
#[derive(Debug)]
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Required + Send,
{
    type Rejection = Reply;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|_| Reply::invalid_input())?;
        if !body.is_complete() {
            return Err(Reply::invalid_input());
        }
        Ok(Self(body))
    }
}

impl<T: Required> Required for Vec<T> {
    fn is_complete(&self) -> bool {
        !self.is_empty() && self.iter().all(Required::is_complete)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn empty_values_are_not_filled() {
        assert!(!filled_value(&Value::Null));
        assert!(!filled_value(&json!("  ")));
        assert!(!filled_value(&json!([])));
        assert!(!filled_value(&json!({})));
        assert!(filled_value(&json!({"text": "hi"})));
        assert!(filled_value(&json!(0)));
    }

    struct Named(&'static str);

    impl Required for Named {
        fn is_complete(&self) -> bool {
            filled(self.0)
        }
    }

    #[test]
    fn lists_need_every_item() {
        assert!(!Vec::<Named>::new().is_complete());
        assert!(vec![Named("a"), Named("b")].is_complete());
        assert!(!vec![Named("a"), Named("")].is_complete());
    }
}
