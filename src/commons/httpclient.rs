//! Some helper functions for HTTP calls.

use std::fmt;
use std::time::Duration;
use bytes::Bytes;
use reqwest::{Response, StatusCode};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use crate::constants::ROAHIST_USER_AGENT;

const JSON_CONTENT: &str = "application/json";


/// Creates a client with the given timeout for the whole request.
pub fn client(uri: &str, timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::ClientBuilder::new()
        .timeout(timeout)
        .default_headers(headers())
        .build()
        .map_err(|e| Error::request_build(uri, e))
}

fn headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(ROAHIST_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT));
    headers
}

/// Performs a GET request and returns the complete response body.
///
/// Any status other than a success is an error. The body is read in full
/// before returning, so a connection dropped half way through the body is
/// reported as an error rather than as a short body.
pub async fn get_bytes(
    client: &reqwest::Client, uri: &str
) -> Result<Bytes, Error> {
    let res = client
        .get(uri)
        .send()
        .await
        .map_err(|e| Error::execute(uri, e))?;

    bytes_response(uri, res).await
}

async fn bytes_response(uri: &str, res: Response) -> Result<Bytes, Error> {
    let status = res.status();
    if !status.is_success() {
        return Err(Error::from_res(uri, res).await)
    }
    res.bytes().await.map_err(|e| Error::response(uri, e))
}


//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type ErrorMessage = String;

#[derive(Debug)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),
    RequestExecute(ErrorUri, ErrorMessage),
    Response(ErrorUri, ErrorMessage),
    ErrorResponseWithBody(ErrorUri, StatusCode, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => {
                write!(f, "Issue creating request for URI: {uri}, error: {msg}")
            }
            Error::RequestExecute(uri, msg) => {
                write!(f, "Issue accessing URI: {uri}, error: {msg}")
            }
            Error::Response(uri, msg) => {
                write!(f,
                    "Issue processing response from URI: {uri}, error: {msg}"
                )
            }
            Error::ErrorResponseWithBody(uri, code, e) => {
                write!(f,
                    "Error response from URI: {uri}, Status: {code}, \
                     Error: {e}"
                )
            }
        }
    }
}

impl std::error::Error for Error { }

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn unexpected_status(status: StatusCode) -> String {
        format!("unexpected status code {status}")
    }

    pub fn response_unexpected_status(uri: &str, status: StatusCode) -> Self {
        Error::Response(uri.to_string(), Self::unexpected_status(status))
    }

    async fn from_res(uri: &str, res: Response) -> Error {
        let status = res.status();
        match res.text().await {
            Ok(body) if !body.is_empty() => {
                Error::ErrorResponseWithBody(uri.to_string(), status, body)
            }
            _ => Self::response_unexpected_status(uri, status),
        }
    }
}
