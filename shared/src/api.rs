//! Remote request client for the ideas endpoints.
//!
//! Builds the three requests and turns their results into typed replies.
//! Every failure is reported once as [`RequestFailed`]; nothing here retries.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

use crate::capabilities::{HttpError, HttpMethod, HttpRequest, HttpResult, ValidatedUrl};
use crate::config::{Config, ConfigError};
use crate::model::{Idea, IdeaId};

/// Which endpoint a request went to, carried with it so the result can be
/// routed back.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiCall {
    FetchIdeas,
    CreateIdea,
    UpvoteIdea(IdeaId),
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchIdeas => f.write_str("fetch ideas"),
            Self::CreateIdea => f.write_str("create idea"),
            Self::UpvoteIdea(id) => write!(f, "upvote idea {id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiReply {
    Ideas(Vec<Idea>),
    Created(Idea),
    /// `idea` is whatever the server sent back, which may not be `requested`.
    Upvoted { requested: IdeaId, idea: Idea },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestFailed {
    #[error("could not build {call} request: {error}")]
    InvalidRequest {
        call: ApiCall,
        #[source]
        error: HttpError,
    },

    #[error("{call} failed: {error}")]
    Transport {
        call: ApiCall,
        #[source]
        error: HttpError,
    },

    #[error("{call} returned HTTP {status}")]
    Status {
        call: ApiCall,
        status: u16,
        request_id: String,
    },

    #[error("{call} returned an unexpected body: {reason}")]
    Decode { call: ApiCall, reason: String },
}

impl RequestFailed {
    #[must_use]
    pub const fn call(&self) -> ApiCall {
        match self {
            Self::InvalidRequest { call, .. }
            | Self::Transport { call, .. }
            | Self::Status { call, .. }
            | Self::Decode { call, .. } => *call,
        }
    }
}

#[derive(Serialize)]
struct CreateIdeaBody<'a> {
    text: &'a str,
}

#[derive(Clone, Debug)]
pub struct IdeaApi {
    base: Url,
    timeout_ms: u64,
}

impl IdeaApi {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let base = Url::parse(&config.api_base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: config.api_base_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            base,
            timeout_ms: config.request_timeout_ms,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Same host, `http` upgraded to `ws` (and `https` to `wss`).
    #[must_use]
    pub fn push_url(&self) -> String {
        let base = self.base.as_str();
        match base.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => base.to_string(),
        }
    }

    /// `GET /ideas`
    pub fn fetch_ideas(&self) -> Result<HttpRequest, RequestFailed> {
        let call = ApiCall::FetchIdeas;
        self.endpoint(&["ideas"])
            .map(|url| HttpRequest::new(HttpMethod::Get, url))
            .and_then(|request| request.with_timeout_ms(self.timeout_ms))
            .map_err(|error| RequestFailed::InvalidRequest { call, error })
    }

    /// `POST /ideas` with `{"text": ...}`; the text is trimmed first.
    pub fn create_idea(&self, text: &str) -> Result<HttpRequest, RequestFailed> {
        let call = ApiCall::CreateIdea;
        let text = text.trim();
        if text.is_empty() {
            return Err(RequestFailed::InvalidRequest {
                call,
                error: HttpError::InvalidRequest {
                    reason: "idea text is empty".to_string(),
                },
            });
        }

        self.endpoint(&["ideas"])
            .map(|url| HttpRequest::new(HttpMethod::Post, url))
            .and_then(|request| request.with_json(&CreateIdeaBody { text }))
            .and_then(|request| request.with_timeout_ms(self.timeout_ms))
            .map_err(|error| RequestFailed::InvalidRequest { call, error })
    }

    /// `POST /ideas/{id}/upvote`
    pub fn upvote_idea(&self, id: IdeaId) -> Result<HttpRequest, RequestFailed> {
        let call = ApiCall::UpvoteIdea(id);
        let id = id.to_string();
        self.endpoint(&["ideas", &id, "upvote"])
            .map(|url| HttpRequest::new(HttpMethod::Post, url))
            .and_then(|request| request.with_timeout_ms(self.timeout_ms))
            .map_err(|error| RequestFailed::InvalidRequest { call, error })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<ValidatedUrl, HttpError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| HttpError::InvalidUrl {
                url: self.base.to_string(),
                reason: "base URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        ValidatedUrl::from_url(&url)
    }
}

impl ApiCall {
    /// Interprets the result of the request this call issued. Non-2xx
    /// statuses and unexpected bodies are failures.
    pub fn decode(self, result: HttpResult) -> Result<ApiReply, RequestFailed> {
        let response = result.map_err(|error| RequestFailed::Transport { call: self, error })?;

        if !response.is_success() {
            return Err(RequestFailed::Status {
                call: self,
                status: response.status(),
                request_id: response.request_id().to_string(),
            });
        }

        let decode_error = |e: HttpError| RequestFailed::Decode {
            call: self,
            reason: e.to_string(),
        };

        match self {
            Self::FetchIdeas => response.json().map(ApiReply::Ideas).map_err(decode_error),
            Self::CreateIdea => response.json().map(ApiReply::Created).map_err(decode_error),
            Self::UpvoteIdea(requested) => response
                .json()
                .map(|idea| ApiReply::Upvoted { requested, idea })
                .map_err(decode_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::{connection_refused, json_response};
    use assert_matches::assert_matches;

    fn api(base: &str) -> IdeaApi {
        IdeaApi::from_config(&Config::default().with_api_base_url(base)).unwrap()
    }

    #[test]
    fn builds_endpoint_urls() {
        let api = api("http://localhost:4000");

        let list = api.fetch_ideas().unwrap();
        assert_eq!(list.method(), HttpMethod::Get);
        assert_eq!(list.url().as_str(), "http://localhost:4000/ideas");

        let upvote = api.upvote_idea(IdeaId(42)).unwrap();
        assert_eq!(upvote.method(), HttpMethod::Post);
        assert_eq!(upvote.url().as_str(), "http://localhost:4000/ideas/42/upvote");
        assert_eq!(upvote.body(), None);
    }

    #[test]
    fn keeps_base_path_prefix() {
        let api = api("https://example.com/api/");
        assert_eq!(
            api.fetch_ideas().unwrap().url().as_str(),
            "https://example.com/api/ideas"
        );
    }

    #[test]
    fn create_posts_trimmed_text() {
        let request = api("http://localhost:4000").create_idea("  Test \n").unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:4000/ideas");
        assert_eq!(request.body(), Some(br#"{"text":"Test"}"#.as_slice()));
        assert_eq!(request.headers().get("content-type"), Some("application/json"));
    }

    #[test]
    fn create_rejects_blank_text() {
        assert_matches!(
            api("http://localhost:4000").create_idea(" \t"),
            Err(RequestFailed::InvalidRequest { call: ApiCall::CreateIdea, .. })
        );
    }

    #[test]
    fn push_url_upgrades_scheme() {
        assert_eq!(api("http://localhost:4000").push_url(), "ws://localhost:4000/");
        assert_eq!(api("https://ideas.example.com").push_url(), "wss://ideas.example.com/");
    }

    #[test]
    fn decodes_success_bodies() {
        let ideas = vec![Idea {
            id: IdeaId(1),
            text: "Test".into(),
            upvotes: 0,
        }];
        assert_eq!(
            ApiCall::FetchIdeas.decode(json_response(200, &ideas)),
            Ok(ApiReply::Ideas(ideas.clone()))
        );
        assert_eq!(
            ApiCall::CreateIdea.decode(json_response(200, &ideas[0])),
            Ok(ApiReply::Created(ideas[0].clone()))
        );
    }

    #[test]
    fn non_success_status_fails() {
        let result = ApiCall::FetchIdeas.decode(json_response(500, &serde_json::json!({})));
        assert_matches!(result, Err(RequestFailed::Status { status: 500, .. }));
    }

    #[test]
    fn transport_error_fails() {
        let result = ApiCall::CreateIdea.decode(connection_refused());
        assert_matches!(result, Err(RequestFailed::Transport { call: ApiCall::CreateIdea, .. }));
    }

    #[test]
    fn unexpected_body_fails() {
        let result = ApiCall::FetchIdeas.decode(json_response(200, &serde_json::json!({"ideas": []})));
        assert_matches!(result, Err(RequestFailed::Decode { .. }));
    }

    #[test]
    fn upvote_reply_keeps_requested_id() {
        let other = Idea {
            id: IdeaId(2),
            text: "x".into(),
            upvotes: 3,
        };
        assert_eq!(
            ApiCall::UpvoteIdea(IdeaId(1)).decode(json_response(200, &other)),
            Ok(ApiReply::Upvoted {
                requested: IdeaId(1),
                idea: other,
            })
        );
    }
}
