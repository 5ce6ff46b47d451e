use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityError, ActivityHeader, ActivityId, MetadataUpdate};
use crate::track::{Track, TrackError};

/// An operation a backend may or may not be able to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    List,
    Fetch,
    Save,
    Remove,
    UpdateMetadata,
    UpdateVisibility,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Self::List,
        Self::Fetch,
        Self::Save,
        Self::Remove,
        Self::UpdateMetadata,
        Self::UpdateVisibility,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Fetch => write!(f, "fetch"),
            Self::Save => write!(f, "save"),
            Self::Remove => write!(f, "remove"),
            Self::UpdateMetadata => write!(f, "update-metadata"),
            Self::UpdateVisibility => write!(f, "update-visibility"),
        }
    }
}

/// The set of operations a backend supports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn all() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Errors that can occur when interacting with a backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The backend cannot perform this operation at all. Branch, don't retry.
    #[error("{backend} does not support {capability}")]
    Unsupported {
        backend: String,
        capability: Capability,
    },

    #[error("activity not found: {0}")]
    NotFound(ActivityId),

    /// Timeouts, rate limits, dropped connections. Eligible for retry.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Authentication or validation failures. Never retried.
    #[error("backend failure: {0}")]
    Permanent(String),

    /// Out-of-order points, or a saved copy that does not match its source.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// The activity has no owning backend (never saved, or the backend is gone).
    #[error("activity is not attached to a live backend")]
    Detached,
}

impl BackendError {
    pub fn unsupported(backend: &str, capability: Capability) -> Self {
        Self::Unsupported {
            backend: backend.to_owned(),
            capability,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl From<TrackError> for BackendError {
    fn from(err: TrackError) -> Self {
        Self::DataIntegrity(err.to_string())
    }
}

impl From<ActivityError> for BackendError {
    fn from(err: ActivityError) -> Self {
        Self::Permanent(err.to_string())
    }
}

/// A place where activities live: a local store, a tracking-service account.
///
/// Backends describe what they can do through [`capabilities`](Backend::capabilities).
/// Anything outside that set must fail with [`BackendError::Unsupported`]
/// rather than silently succeed. No call may touch another backend's state.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable label identifying this backend.
    fn label(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// List all activities as headers. Must not fetch full tracks.
    async fn list(&self) -> Result<Vec<ActivityHeader>, BackendError>;

    /// Fetch the full track of one activity.
    async fn fetch(&self, id: &ActivityId) -> Result<Track, BackendError>;

    /// Store a loaded activity and return the identifier issued for it.
    async fn save(&self, activity: &Activity) -> Result<ActivityId, BackendError>;

    async fn remove(&self, _id: &ActivityId) -> Result<(), BackendError> {
        Err(BackendError::unsupported(self.label(), Capability::Remove))
    }

    /// Change metadata of a stored activity.
    ///
    /// Implementations must check every capability the update needs before
    /// writing anything, so a rejected update leaves no partial change.
    async fn update_metadata(
        &self,
        _id: &ActivityId,
        _update: &MetadataUpdate,
    ) -> Result<(), BackendError> {
        Err(BackendError::unsupported(
            self.label(),
            Capability::UpdateMetadata,
        ))
    }
}

#[async_trait::async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn supports(&self, capability: Capability) -> bool {
        (**self).supports(capability)
    }

    async fn list(&self) -> Result<Vec<ActivityHeader>, BackendError> {
        (**self).list().await
    }

    async fn fetch(&self, id: &ActivityId) -> Result<Track, BackendError> {
        (**self).fetch(id).await
    }

    async fn save(&self, activity: &Activity) -> Result<ActivityId, BackendError> {
        (**self).save(activity).await
    }

    async fn remove(&self, id: &ActivityId) -> Result<(), BackendError> {
        (**self).remove(id).await
    }

    async fn update_metadata(
        &self,
        id: &ActivityId,
        update: &MetadataUpdate,
    ) -> Result<(), BackendError> {
        (**self).update_metadata(id, update).await
    }
}

/// The capabilities an update needs beyond the basic metadata write.
pub fn required_capabilities(update: &MetadataUpdate) -> Vec<Capability> {
    let mut required = Vec::with_capacity(2);
    if update.title.is_some()
        || update.description.is_some()
        || update.keywords.is_some()
        || update.what.is_some()
    {
        required.push(Capability::UpdateMetadata);
    }
    if update.touches_visibility() {
        required.push(Capability::UpdateVisibility);
    }
    required
}

/// Fail with `Unsupported` for the first capability of `update` that
/// `capabilities` lacks.
pub fn check_update_supported(
    label: &str,
    capabilities: &Capabilities,
    update: &MetadataUpdate,
) -> Result<(), BackendError> {
    match required_capabilities(update)
        .into_iter()
        .find(|capability| !capabilities.contains(*capability))
    {
        Some(missing) => Err(BackendError::unsupported(label, missing)),
        None => Ok(()),
    }
}
