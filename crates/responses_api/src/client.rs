use std::collections::VecDeque;

use agent_protocol::{ModelClient, ModelError, ModelRequest, ResponseEvent, ResponseStream};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::config::ResponsesApiConfig;
use crate::error::{model_error_from_reqwest, model_error_from_response, ResponsesApiError};
use crate::headers::{build_headers, HEADER_REQUEST_ID};
use crate::payload::ResponsesPayload;
use crate::sse::{ParsedEvent, SseStreamParser};
use crate::url::normalize_responses_url;

#[derive(Debug)]
pub struct ResponsesClient {
    http: Client,
    config: ResponsesApiConfig,
    headers: HeaderMap,
}

impl ResponsesClient {
    pub fn new(config: ResponsesApiConfig) -> Result<Self, ResponsesApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        let headers = header_map(&config)?;
        Ok(Self {
            http,
            config,
            headers,
        })
    }

    pub fn config(&self) -> &ResponsesApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_responses_url(&self.config.base_url)
    }

    pub fn build_request(&self, request: &ModelRequest) -> reqwest::RequestBuilder {
        self.http
            .post(self.normalized_endpoint())
            .headers(self.headers.clone())
            .json(&ResponsesPayload::from_request(request))
    }
}

fn header_map(config: &ResponsesApiConfig) -> Result<HeaderMap, ResponsesApiError> {
    let mut out = HeaderMap::new();
    for (key, value) in build_headers(config) {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ResponsesApiError::InvalidHeader { name: key.clone() })?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| ResponsesApiError::InvalidHeader { name: key.clone() })?;
        out.insert(name, value);
    }
    Ok(out)
}

#[async_trait]
impl ModelClient for ResponsesClient {
    async fn stream(&self, request: ModelRequest) -> Result<ResponseStream, ModelError> {
        tracing::debug!(
            model = %request.model,
            items = request.input.len(),
            store = request.store,
            "sending responses request"
        );
        let response = self
            .build_request(&request)
            .send()
            .await
            .map_err(|error| model_error_from_reqwest(&error))?;

        let status = response.status();
        if !status.is_success() {
            let request_id = response
                .headers()
                .get(HEADER_REQUEST_ID)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.unwrap_or_default();
            let error = model_error_from_response(status.as_u16(), request_id.as_deref(), &body);
            tracing::debug!(status = status.as_u16(), %error, "responses request rejected");
            return Err(error);
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(event_stream(bytes))
    }
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseStreamParser,
    pending: VecDeque<ParsedEvent>,
    completed: bool,
    finished: bool,
}

/// Turn a body byte stream into response events.
///
/// The stream ends after the first error. A body that ends before any
/// `response.completed` frame yields a premature-close error.
fn event_stream(bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> ResponseStream {
    let state = StreamState {
        bytes,
        parser: SseStreamParser::default(),
        pending: VecDeque::new(),
        completed: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match &event {
                    Ok(ResponseEvent::Completed { .. }) => state.completed = true,
                    Ok(_) => {}
                    Err(_) => {
                        state.pending.clear();
                        state.finished = true;
                    }
                }
                return Some((event, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.parser.feed(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(model_error_from_reqwest(&error)), state));
                }
                None => {
                    state.finished = true;
                    let tail = state.parser.finish();
                    let completes = tail
                        .iter()
                        .any(|event| matches!(event, Ok(ResponseEvent::Completed { .. })));
                    state.pending.extend(tail);
                    if !state.completed && !completes {
                        state.pending.push_back(Err(ModelError::premature_close()));
                    }
                }
            }
        }
    })
    .boxed()
}
