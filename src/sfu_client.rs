//! Typed wrapper over the SFU's HTTP control plane.
//!
//! Every call goes through [`HttpFetcher`] rather than `reqwest` directly so
//! tests can substitute [`partytracks_test_utils::MockSfuServer`] or a
//! purpose-built fake without spinning up a socket, and every call is
//! recorded to a [`History`] the way a browser's dev tools would record it.

use std::sync::Arc;

use async_trait::async_trait;
use partytracks_protocol::{
    CloseTracksRequest, CloseTracksResponse, GenerateIceServersResponse, HistoryEntry,
    NewSessionResponse, NewTracksRequest, NewTracksResponse, RenegotiateRequest,
    RenegotiateResponse, UpdateTracksRequest,
};

use crate::error::PartyTracksError;
use crate::history::History;

/// Transport seam for [`SfuClient`]. `(status, body)` is returned uniformly
/// so the client can distinguish an HTTP-level failure (never reached the
/// SFU) from an application-level error encoded in a 200 response body.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<(u16, serde_json::Value), PartyTracksError>;
    async fn post(&self, url: &str, body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError>;
    async fn put(&self, url: &str, body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_body(url: &str, response: reqwest::Response) -> Result<(u16, serde_json::Value), PartyTracksError> {
    let status = response.status().as_u16();
    let body = response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| PartyTracksError::http(url, e.to_string()))?;
    Ok((status, body))
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<(u16, serde_json::Value), PartyTracksError> {
        let response = self.client.get(url).send().await.map_err(|e| PartyTracksError::http(url, e.to_string()))?;
        read_body(url, response).await
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PartyTracksError::http(url, e.to_string()))?;
        read_body(url, response).await
    }

    async fn put(&self, url: &str, body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError> {
        let response = self
            .client
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PartyTracksError::http(url, e.to_string()))?;
        read_body(url, response).await
    }
}

pub struct SfuClient {
    base_url: String,
    fetcher: Arc<dyn HttpFetcher>,
    history: Arc<History>,
}

impl SfuClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, fetcher: Arc<dyn HttpFetcher>, history: Arc<History>) -> Self {
        Self { base_url: base_url.into(), fetcher, history }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn call<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        path: String,
        body: Option<&Req>,
    ) -> Result<Resp, PartyTracksError> {
        let url = self.url(&path);
        let request_body = body.map(|b| serde_json::to_value(b).unwrap_or(serde_json::Value::Null));
        if let Some(body) = &request_body {
            self.history.record(HistoryEntry::Request {
                endpoint: path.clone(),
                method: method.to_owned(),
                body: body.clone(),
            });
        }

        let (status, response_body) = match (method, &request_body) {
            ("GET", _) => self.fetcher.get(&url).await?,
            ("POST", Some(body)) => self.fetcher.post(&url, body.clone()).await?,
            ("PUT", Some(body)) => self.fetcher.put(&url, body.clone()).await?,
            ("POST", None) => self.fetcher.post(&url, serde_json::Value::Null).await?,
            _ => unreachable!("unsupported method/body combination"),
        };

        self.history.record(HistoryEntry::Response {
            endpoint: path.clone(),
            method: method.to_owned(),
            status,
            body: response_body.clone(),
        });

        if !(200..300).contains(&status) {
            return Err(PartyTracksError::http(path, format!("sfu returned status {status}")));
        }

        serde_json::from_value(response_body).map_err(|e| PartyTracksError::http(path, e.to_string()))
    }

    pub async fn new_session(&self) -> Result<NewSessionResponse, PartyTracksError> {
        self.call::<(), _>("POST", "/sessions/new".to_owned(), None).await
    }

    pub async fn generate_ice_servers(&self) -> Result<GenerateIceServersResponse, PartyTracksError> {
        self.call::<(), _>("GET", "/generate-ice-servers".to_owned(), None).await
    }

    pub async fn new_tracks(
        &self,
        session_id: &str,
        request: NewTracksRequest,
    ) -> Result<NewTracksResponse, PartyTracksError> {
        self.call("POST", format!("/sessions/{session_id}/tracks/new"), Some(&request)).await
    }

    pub async fn renegotiate(
        &self,
        session_id: &str,
        request: RenegotiateRequest,
    ) -> Result<RenegotiateResponse, PartyTracksError> {
        self.call("PUT", format!("/sessions/{session_id}/renegotiate"), Some(&request)).await
    }

    pub async fn update_tracks(
        &self,
        session_id: &str,
        request: UpdateTracksRequest,
    ) -> Result<(), PartyTracksError> {
        self.call::<_, serde_json::Value>("PUT", format!("/sessions/{session_id}/tracks/update"), Some(&request))
            .await
            .map(|_| ())
    }

    pub async fn close_tracks(
        &self,
        session_id: &str,
        request: CloseTracksRequest,
    ) -> Result<CloseTracksResponse, PartyTracksError> {
        self.call("PUT", format!("/sessions/{session_id}/tracks/close"), Some(&request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticFetcher {
        responses: Mutex<Vec<(u16, serde_json::Value)>>,
    }

    #[async_trait]
    impl HttpFetcher for StaticFetcher {
        async fn get(&self, _url: &str) -> Result<(u16, serde_json::Value), PartyTracksError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
        async fn post(&self, _url: &str, _body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
        async fn put(&self, _url: &str, _body: serde_json::Value) -> Result<(u16, serde_json::Value), PartyTracksError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    #[tokio::test]
    async fn new_session_parses_the_response_and_records_history() {
        let fetcher = Arc::new(StaticFetcher {
            responses: Mutex::new(vec![(200, serde_json::json!({"sessionId": "abc"}))]),
        });
        let history = Arc::new(History::new(10));
        let client = SfuClient::new("https://sfu.example.com", fetcher, history.clone());

        let response = client.new_session().await.unwrap();
        assert_eq!(response.session_id, "abc");
        assert_eq!(history.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn non_2xx_status_is_surfaced_as_an_error() {
        let fetcher = Arc::new(StaticFetcher { responses: Mutex::new(vec![(500, serde_json::json!({}))]) });
        let client = SfuClient::new("https://sfu.example.com", fetcher, Arc::new(History::new(10)));

        let err = client.new_session().await.unwrap_err();
        assert!(matches!(err, PartyTracksError::Http { .. }));
    }
}
