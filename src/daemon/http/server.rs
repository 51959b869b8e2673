//! The HTTP server.
//!
//! The server only ever handles a handful of paths:
//!
//! * `/health` answers with an empty 200 response,
//! * `/update` triggers an ingestion run via GET or POST,
//! * `/api/v1/status` returns the current state of the history, and
//! * `/api/v1/roas` returns ROA histories, optionally filtered with the
//!   query parameters `asn` and `prefix`.

use std::convert::Infallible;
use std::sync::Arc;
use hyper::{Method, StatusCode};
use log::{debug, trace, warn};
use percent_encoding::percent_decode_str;
use crate::api::roa::{RoaQuery, RoaQueryError};
use crate::api::status::ErrorResponse;
use crate::server::manager::{RoaHistoryManager, ingest_status};
use crate::server::source::RoaSource;
use super::response::{HttpResponse, HyperResponse};


//------------ HyperRequest --------------------------------------------------

/// A type alias for the request we receive from Hyper.
pub type HyperRequest = hyper::Request<hyper::body::Incoming>;


//------------ HttpServer ----------------------------------------------------

pub struct HttpServer<S> {
    manager: Arc<RoaHistoryManager<S>>,
}

impl<S> Clone for HttpServer<S> {
    fn clone(&self) -> Self {
        HttpServer { manager: self.manager.clone() }
    }
}

impl<S: RoaSource> HttpServer<S> {
    pub fn new(manager: Arc<RoaHistoryManager<S>>) -> Self {
        HttpServer { manager }
    }

    pub async fn process_request(
        &self, request: HyperRequest
    ) -> Result<HyperResponse, Infallible> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        trace!("Received {method} request for {path}");

        let response = self.route(
            &method, &path, request.uri().query()
        ).await;

        if let Some(cause) = response.cause() {
            warn!(
                "{} {} failed with {}: {}",
                method, path, response.status(), cause
            );
        }
        else {
            debug!("{} {} {}", method, path, response.status());
        }
        Ok(response.into_hyper())
    }

    async fn route(
        &self, method: &Method, path: &str, query: Option<&str>
    ) -> HttpResponse {
        match path {
            "/health" => {
                if *method != Method::GET {
                    return HttpResponse::method_not_allowed()
                }
                HttpResponse::ok()
            }
            "/update" => {
                if *method != Method::GET && *method != Method::POST {
                    return HttpResponse::method_not_allowed()
                }
                self.update().await
            }
            "/api/v1/status" => {
                if *method != Method::GET {
                    return HttpResponse::method_not_allowed()
                }
                match self.manager.status().await {
                    Ok(status) => HttpResponse::json(&status),
                    Err(err) => HttpResponse::response_from_error(err),
                }
            }
            "/api/v1/roas" => {
                if *method != Method::GET {
                    return HttpResponse::method_not_allowed()
                }
                self.roas(query).await
            }
            _ => HttpResponse::not_found()
        }
    }

    /// Runs an ingestion and responds with its terminal status.
    ///
    /// The body is always the status. The response code is 200 for a
    /// completed run and the code of the error otherwise.
    async fn update(&self) -> HttpResponse {
        let res = self.manager.ingest().await;
        let status = match res.as_ref() {
            Ok(_) => StatusCode::OK,
            Err(err) => err.status(),
        };
        HttpResponse::json_with_status(status, &ingest_status(res))
    }

    async fn roas(&self, query: Option<&str>) -> HttpResponse {
        let query = match parse_query(query.unwrap_or_default()) {
            Ok(query) => query,
            Err(err) => {
                return HttpResponse::error(
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::new("api-invalid-query", &err)
                )
            }
        };
        match self.manager.query(query).await {
            Ok(roas) => HttpResponse::json(&roas),
            Err(err) => HttpResponse::response_from_error(err),
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Parses the query string of a ROA lookup.
///
/// Parameters other than `asn` and `prefix` as well as empty values are
/// ignored.
fn parse_query(query: &str) -> Result<RoaQuery, RoaQueryError> {
    let mut res = RoaQuery::default();
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = value.replace('+', " ");
        let value = percent_decode_str(&value).decode_utf8_lossy();
        if value.trim().is_empty() {
            continue
        }
        match key {
            "asn" => res = res.with_asn(&value),
            "prefix" => res = res.with_prefix(&value)?,
            _ => { }
        }
    }
    Ok(res)
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::roa::RawRoa;

    #[test]
    fn parse_queries() {
        let roa = RawRoa::new("AS64500", "2001:db8::/32", 48, "RIPE")
            .normalize();

        assert!(parse_query("").unwrap().is_empty());
        assert!(parse_query("foo=bar&asn=").unwrap().is_empty());

        let query = parse_query("asn=AS64500").unwrap();
        assert!(query.matches(&roa));

        let query = parse_query("prefix=2001%3Adb8%3A%3A%2F32").unwrap();
        assert!(query.matches(&roa));

        let query = parse_query("asn=64500&prefix=2001:db8::/48").unwrap();
        assert!(!query.matches(&roa));

        assert!(parse_query("prefix=2001:db8::/x").is_err());
    }
}
