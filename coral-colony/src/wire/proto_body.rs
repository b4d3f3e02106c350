//! Axum extractor/response wrapper for protobuf bodies.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use prost::Message;

use crate::shared::HttpError;

pub(crate) const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// A protobuf request/response body.
///
/// Decoding failures reject with 400, mirroring the structural
/// `MalformedRequest` kind.
pub(crate) struct Proto<T>(pub T);

impl<S, T> FromRequest<S> for Proto<T>
where
    S: Send + Sync,
    T: Message + Default,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| HttpError::new(StatusCode::BAD_REQUEST, Some(e)))?;

        let message = T::decode(bytes)
            .map_err(|e| HttpError::new(StatusCode::BAD_REQUEST, Some(e)))?;

        Ok(Proto(message))
    }
}

impl<T: Message> IntoResponse for Proto<T> {
    fn into_response(self) -> Response {
        let body = self.0.encode_to_vec();
        (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(CONTENT_TYPE_PROTOBUF),
            )],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::v1::HeartbeatRequest;

    #[tokio::test]
    async fn decode_rejects_garbage() {
        let req = Request::builder()
            .body(axum::body::Body::from(vec![0xff, 0xff, 0xff]))
            .unwrap();

        let result = Proto::<HeartbeatRequest>::from_request(req, &()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn roundtrip_through_body() {
        let message = HeartbeatRequest {
            agent_id: "agent-1".to_string(),
        };
        let req = Request::builder()
            .body(axum::body::Body::from(message.encode_to_vec()))
            .unwrap();

        let Proto(decoded) = Proto::<HeartbeatRequest>::from_request(req, &())
            .await
            .unwrap();
        assert_eq!(decoded, message);
    }
}
