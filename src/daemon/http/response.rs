//! HTTP responses.

use bytes::Bytes;
use http_body_util::{Either, Empty, Full};
use hyper::StatusCode;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use log::error;
use serde::Serialize;
use crate::api::status::ErrorResponse;
use crate::commons::error::Error;


//----------- ContentType ----------------------------------------------------

#[derive(Clone, Copy)]
enum ContentType {
    Json,
    Text,
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Text => "text/plain",
        }
    }
}


//------------ HyperResponse -------------------------------------------------

pub type HyperResponseBody = Either<Empty<Bytes>, Full<Bytes>>;
pub type HyperResponse = hyper::Response<HyperResponseBody>;


//------------ HttpResponse --------------------------------------------------

/// A response to be sent by the HTTP server.
///
/// Keeps the error a response was created from, if any, for logging.
#[derive(Debug)]
pub struct HttpResponse {
    response: HyperResponse,
    cause: Option<Error>,
}

impl HttpResponse {
    fn new(
        status: StatusCode, content_type: ContentType, body: Bytes
    ) -> Self {
        let body = if body.is_empty() {
            Either::Left(Empty::new())
        }
        else {
            Either::Right(Full::new(body))
        };
        let mut response = hyper::Response::new(body);
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE, HeaderValue::from_static(content_type.as_str())
        );
        HttpResponse { response, cause: None }
    }

    pub fn into_hyper(self) -> HyperResponse {
        self.response
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }

    pub fn json<O: Serialize>(object: &O) -> Self {
        Self::json_with_status(StatusCode::OK, object)
    }

    pub fn json_with_status<O: Serialize>(
        status: StatusCode, object: &O
    ) -> Self {
        match serde_json::to_vec(object) {
            Ok(json) => Self::new(status, ContentType::Json, json.into()),
            Err(err) => {
                error!("Failed to serialize response: {err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR, ContentType::Text,
                    Bytes::from_static(b"internal server error")
                )
            }
        }
    }

    pub fn error(status: StatusCode, error: ErrorResponse) -> Self {
        Self::json_with_status(status, &error)
    }

    pub fn response_from_error(error: Error) -> Self {
        let mut res = Self::error(error.status(), error.to_error_response());
        res.cause = Some(error);
        res
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK, ContentType::Text, Bytes::new())
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, ContentType::Text, Bytes::new())
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED, ContentType::Text, Bytes::new()
        )
    }
}
