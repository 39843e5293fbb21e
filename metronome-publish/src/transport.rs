// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The transport primitive publishers send through.

use std::{fmt, future::Future};

use crate::TransportError;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// POST
    Post,
    /// PUT
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        })
    }
}

/// A fully encoded request, ready to send.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method
    pub method: Method,
    /// Absolute URL, query string included
    pub url: String,
    /// Headers as `(name, value)` pairs
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// A request with a JSON body
    pub fn json(method: Method, url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: vec![("Content-Type".to_owned(), "application/json".to_owned())],
            body,
        }
    }

    /// Body as UTF-8, lossily
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// The URL with query parameter values masked, safe to log.
    pub fn redacted_url(&self) -> String {
        match self.url.split_once('?') {
            Some((path, _)) => format!("{path}?<redacted>"),
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // URLs carry API keys
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.redacted_url())
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Status and body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl HttpResponse {
    /// A response with an empty body
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// Sends one request.
///
/// Implementations should only return an error when no response was obtained
/// at all. Non-2xx responses are returned as `Ok` and classified by the caller.
pub trait HttpSender: Send + Sync + 'static {
    /// Send `request` and wait for the response
    fn send(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

/// How a send attempt turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx
    Success,
    /// Worth retrying: no response, 5xx, 408 or 429
    Transient,
    /// Retrying will not help
    Permanent,
}

/// Classify a status code
pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        408 | 429 | 500..=599 => Outcome::Transient,
        _ => Outcome::Permanent,
    }
}
