use std::time::Duration;

use reqwest::StatusCode;
use trackmove::backend::check_update_supported;
use trackmove::{
    Activity, ActivityHeader, ActivityId, Backend, BackendError, Capabilities, Capability,
    MetadataUpdate, Point, Track,
};

use crate::wire::{ActivityEntry, Created, NewActivity, PointEntry};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for a tracking-service account.
#[derive(Debug, Clone)]
pub struct RemoteBackendConfig {
    pub label: String,
    pub base_url: String,
    pub username: Option<String>,
    pub token: Option<String>,
    /// Operations this service does not offer. They fail locally.
    pub unsupported: Vec<Capability>,
}

/// Talks to a tracking service over its JSON API.
pub struct RemoteBackend {
    config: RemoteBackendConfig,
    capabilities: Capabilities,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(config: RemoteBackendConfig) -> Self {
        let capabilities = config
            .unsupported
            .iter()
            .fold(Capabilities::all(), |caps, capability| caps.without(*capability));
        Self {
            config,
            capabilities,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn build_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, self.url(path))
            .header("User-Agent", "trackmove")
            .timeout(REQUEST_TIMEOUT);

        match (&self.config.username, &self.config.token) {
            (Some(username), token) => req.basic_auth(username, token.as_deref()),
            (None, Some(token)) => req.bearer_auth(token),
            (None, None) => req,
        }
    }

    fn require(&self, capability: Capability) -> Result<(), BackendError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(BackendError::unsupported(&self.config.label, capability))
        }
    }

    /// Send a request and turn non-success statuses into backend errors.
    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        id: Option<&ActivityId>,
    ) -> Result<reqwest::Response, BackendError> {
        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(backend = %self.config.label, %status, %body, "request failed");
        Err(classify(status, &body, id))
    }
}

#[async_trait::async_trait]
impl Backend for RemoteBackend {
    fn label(&self) -> &str {
        &self.config.label
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn list(&self) -> Result<Vec<ActivityHeader>, BackendError> {
        self.require(Capability::List)?;
        let entries: Vec<ActivityEntry> = self
            .send(self.build_request(reqwest::Method::GET, "/activities"), None)
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        Ok(entries.into_iter().map(ActivityEntry::into_header).collect())
    }

    async fn fetch(&self, id: &ActivityId) -> Result<Track, BackendError> {
        self.require(Capability::Fetch)?;
        let path = format!("/activities/{id}/points");
        let entries: Vec<PointEntry> = self
            .send(self.build_request(reqwest::Method::GET, &path), Some(id))
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        Ok(Track::new(entries.into_iter().map(Point::from).collect())?)
    }

    async fn save(&self, activity: &Activity) -> Result<ActivityId, BackendError> {
        self.require(Capability::Save)?;
        let track = activity
            .track()
            .ok_or_else(|| BackendError::Permanent("activity track is not loaded".into()))?;
        if track.is_empty() {
            return Err(BackendError::Permanent(format!(
                "{} cannot store an activity without points",
                self.config.label
            )));
        }

        let body = NewActivity::new(activity, track);
        let created: Created = self
            .send(
                self.build_request(reqwest::Method::POST, "/activities")
                    .json(&body),
                None,
            )
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        tracing::debug!(backend = %self.config.label, activity = %created.id, points = track.len(), "uploaded activity");
        Ok(ActivityId::new(created.id))
    }

    async fn remove(&self, id: &ActivityId) -> Result<(), BackendError> {
        self.require(Capability::Remove)?;
        let path = format!("/activities/{id}");
        self.send(self.build_request(reqwest::Method::DELETE, &path), Some(id))
            .await?;
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &ActivityId,
        update: &MetadataUpdate,
    ) -> Result<(), BackendError> {
        check_update_supported(&self.config.label, &self.capabilities, update)?;
        update.validate()?;
        if update.is_empty() {
            return Ok(());
        }

        let path = format!("/activities/{id}");
        self.send(
            self.build_request(reqwest::Method::PATCH, &path).json(update),
            Some(id),
        )
        .await?;
        Ok(())
    }
}

/// Map an HTTP status to the backend error taxonomy.
///
/// 404 is only `NotFound` for requests about one activity; anywhere else it
/// means the service is misconfigured.
pub fn classify(status: StatusCode, body: &str, id: Option<&ActivityId>) -> BackendError {
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    match status {
        StatusCode::NOT_FOUND => match id {
            Some(id) => BackendError::NotFound(id.clone()),
            None => BackendError::Permanent(detail),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Transient(detail)
        }
        status if status.is_server_error() => BackendError::Transient(detail),
        _ => BackendError::Permanent(detail),
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_decode() || err.is_builder() {
        BackendError::Permanent(err.to_string())
    } else {
        BackendError::Transient(err.to_string())
    }
}

fn decode_error(err: reqwest::Error) -> BackendError {
    BackendError::Permanent(format!("unexpected response: {err}"))
}
