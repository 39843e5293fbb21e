// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use crate::{HttpRequest, HttpResponse, HttpSender, TransportError};

/// Accepts every request with `200 OK` and remembers it.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl RecordingSender {
    /// A sender with no recorded requests
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sent so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Remove and return every request sent so far
    pub fn take(&self) -> Vec<HttpRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

impl HttpSender for RecordingSender {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(HttpResponse::status(200))
    }
}

/// Answers requests from a script, then with `200 OK` once the script runs out.
///
/// Every attempt is recorded, whatever its outcome.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSender {
    script: Arc<Mutex<VecDeque<Result<HttpResponse, TransportError>>>>,
    attempts: Arc<Mutex<Vec<HttpRequest>>>,
    delivered: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedSender {
    /// A sender that will answer with `script` in order
    pub fn new(script: impl IntoIterator<Item = Result<HttpResponse, TransportError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            attempts: Arc::default(),
            delivered: Arc::default(),
        }
    }

    /// Queue one more answer
    pub fn push(&self, answer: Result<HttpResponse, TransportError>) {
        self.script.lock().unwrap().push_back(answer);
    }

    /// Every attempted request
    pub fn attempts(&self) -> Vec<HttpRequest> {
        self.attempts.lock().unwrap().clone()
    }

    /// Requests that were answered with a 2xx status
    pub fn delivered(&self) -> Vec<HttpRequest> {
        self.delivered.lock().unwrap().clone()
    }
}

impl HttpSender for ScriptedSender {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.attempts.lock().unwrap().push(request.clone());
        let answer = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::status(200)));
        if matches!(&answer, Ok(response) if (200..300).contains(&response.status)) {
            self.delivered.lock().unwrap().push(request.clone());
        }
        answer
    }
}
