//! HTTP implementation of [`RemoteAuthority`].
//!
//! Wire format:
//! - `GET {endpoint}/revisions?photo_id=ID` answers `{"revision": N}`, or 404
//!   when the photo is unknown to the remote.
//! - `POST {endpoint}/edits` takes `{"photo_id", "revision", "payload"}` with
//!   the payload base64-encoded.
//! - `GET {endpoint}/health` answers 200 when the service is reachable.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::remote::RemoteAuthority;
use crate::config::RemoteConfig;
use crate::error::RemoteError;

#[derive(Debug, Serialize)]
struct EditRequest<'a> {
    photo_id: &'a str,
    revision: u64,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct RevisionResponse {
    revision: u64,
}

#[derive(Clone)]
pub struct HttpRemote {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRemote {
    pub fn from_config(config: &RemoteConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.api_key {
            Some(key) => request.set("Authorization", &format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Check whether the remote answers its health endpoint.
    pub async fn ping(&self) -> bool {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let request = this.authorize(this.agent.get(&this.url("health")));
            match request.call() {
                Ok(response) => response.status() == 200,
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }

    fn lookup_revision_blocking(&self, photo_id: &str) -> Result<Option<u64>, RemoteError> {
        let request = self
            .authorize(self.agent.get(&self.url("revisions")))
            .query("photo_id", photo_id);

        match request.call() {
            Ok(response) => {
                let body: RevisionResponse = response.into_json().map_err(|e| {
                    RemoteError::new(format!("Failed to parse revision response: {}", e))
                })?;
                Ok(Some(body.revision))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(code, response)) => Err(RemoteError::new(format!(
                "Revision lookup rejected: {}",
                response.status_text()
            ))
            .with_status(code)),
            Err(e) => Err(RemoteError::new(format!("Revision lookup failed: {}", e))),
        }
    }

    fn apply_blocking(&self, photo_id: &str, payload: &[u8], revision: u64) -> Result<(), RemoteError> {
        let body = EditRequest {
            photo_id,
            revision,
            payload: STANDARD.encode(payload),
        };

        match self.authorize(self.agent.post(&self.url("edits"))).send_json(&body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, response)) => Err(RemoteError::new(format!(
                "Edit rejected: {}",
                response.status_text()
            ))
            .with_status(code)),
            Err(e) => Err(RemoteError::new(format!("Edit upload failed: {}", e))),
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> RemoteError {
    RemoteError::new(format!("Remote call aborted: {}", e))
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn current_revision(&self, photo_id: &str) -> Result<Option<u64>, RemoteError> {
        let this = self.clone();
        let photo_id = photo_id.to_string();
        tokio::task::spawn_blocking(move || this.lookup_revision_blocking(&photo_id))
            .await
            .map_err(join_error)?
    }

    async fn apply(&self, photo_id: &str, payload: &[u8], revision: u64) -> Result<(), RemoteError> {
        let this = self.clone();
        let photo_id = photo_id.to_string();
        let payload = payload.to_vec();
        tokio::task::spawn_blocking(move || this.apply_blocking(&photo_id, &payload, revision))
            .await
            .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> HttpRemote {
        HttpRemote::from_config(&RemoteConfig {
            endpoint: "http://127.0.0.1:9/api/".to_string(),
            api_key: Some("token".to_string()),
            timeout_secs: 1,
        })
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let remote = unreachable();
        assert_eq!(remote.url("edits"), "http://127.0.0.1:9/api/edits");
    }

    #[test]
    fn test_edit_request_encodes_payload_as_base64() {
        let body = EditRequest {
            photo_id: "p1",
            revision: 3,
            payload: STANDARD.encode(b"hello"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"photo_id": "p1", "revision": 3, "payload": "aGVsbG8="})
        );
    }

    #[tokio::test]
    async fn test_unreachable_remote_reports_transport_error() {
        let remote = unreachable();
        assert!(!remote.ping().await);

        let err = remote.current_revision("p1").await.unwrap_err();
        assert_eq!(err.status, None);
        let err = remote.apply("p1", b"x", 1).await.unwrap_err();
        assert_eq!(err.status, None);
    }
}
