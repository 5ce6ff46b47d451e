use std::collections::BTreeSet;
use std::fmt;
use std::sync::Weak;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendError};
use crate::kind::ActivityKind;
use crate::track::{Track, TrackSummary};

/// Some services carry the activity kind and visibility as keywords.
const KIND_PREFIX: &str = "What:";
const STATUS_PREFIX: &str = "Status:";

/// Reserved for [`Activity::what`] and [`Activity::public`].
const RESERVED_KEYWORD_PREFIXES: [&str; 2] = [KIND_PREFIX, STATUS_PREFIX];

/// Backend-scoped identifier for an activity.
/// Each backend determines its own ID scheme (row ids, service ids, file stems).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(String);

impl ActivityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivityError {
    #[error("keyword {0:?} uses a reserved prefix")]
    ReservedKeyword(String),

    #[error("unknown activity kind {0:?}")]
    UnknownKind(String),
}

/// How much of an activity is present in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Built in memory, not saved anywhere.
    Unbound,
    /// Metadata from a backend listing; the track has not been fetched.
    HeaderOnly,
    /// Track fetched from the owning backend.
    Loaded,
}

/// Lightweight record returned from `Backend::list()`.
/// Does not include the track points.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityHeader {
    pub id: ActivityId,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub public: bool,
    pub what: ActivityKind,
    /// Time range and point count, if the backend reports them in listings.
    pub summary: Option<TrackSummary>,
}

/// A recorded track plus its metadata.
///
/// Activities listed from a backend start out header-only and keep a weak
/// reference to that backend, used once to fetch the track on first
/// [`load`](Activity::load). The reference never keeps a backend alive.
#[derive(Debug)]
pub struct Activity {
    id: Option<ActivityId>,
    title: String,
    description: String,
    keywords: BTreeSet<String>,
    public: bool,
    what: ActivityKind,
    summary: Option<TrackSummary>,
    track: Option<Track>,
    state: LoadState,
    backend: Option<Weak<dyn Backend>>,
}

impl Activity {
    /// An unbound activity owning `track`.
    pub fn new(track: Track) -> Self {
        Self {
            id: None,
            title: String::new(),
            description: String::new(),
            keywords: BTreeSet::new(),
            public: false,
            what: ActivityKind::default(),
            summary: None,
            track: Some(track),
            state: LoadState::Unbound,
            backend: None,
        }
    }

    /// A header-only activity living in `backend`.
    ///
    /// `What:` and `Status:` keywords are moved into [`what`](Activity::what)
    /// and [`public`](Activity::public), overriding the header fields. An
    /// unknown kind keeps the header's kind; blank keywords are dropped.
    pub fn from_header(header: ActivityHeader, backend: Weak<dyn Backend>) -> Self {
        let mut what = header.what;
        let mut public = header.public;
        let mut keywords = BTreeSet::new();
        for keyword in header.keywords.iter().map(|k| k.trim()) {
            if let Some(name) = keyword.strip_prefix(KIND_PREFIX) {
                match ActivityKind::parse(name) {
                    Ok(kind) => what = kind,
                    Err(err) => tracing::warn!(activity = %header.id, error = %err, "ignoring kind keyword"),
                }
            } else if let Some(status) = keyword.strip_prefix(STATUS_PREFIX) {
                public = status.trim() == "public";
            } else if !keyword.is_empty() {
                keywords.insert(keyword.to_owned());
            }
        }

        Self {
            id: Some(header.id),
            title: header.title,
            description: header.description,
            keywords,
            public,
            what,
            summary: header.summary,
            track: None,
            state: LoadState::HeaderOnly,
            backend: Some(backend),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_what(mut self, what: ActivityKind) -> Self {
        self.what = what;
        self
    }

    pub fn id(&self) -> Option<&ActivityId> {
        self.id.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Never absent: an activity without a description has an empty one.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Keywords in lexicographic order, without duplicates.
    pub fn keywords(&self) -> Vec<&str> {
        self.keywords.iter().map(String::as_str).collect()
    }

    /// Replace all keywords. Nothing changes if any keyword is reserved.
    pub fn set_keywords<I, S>(&mut self, keywords: I) -> Result<(), ActivityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = normalize_keywords(keywords)?;
        Ok(())
    }

    pub fn add_keyword(&mut self, keyword: &str) -> Result<(), ActivityError> {
        let keyword = keyword.trim();
        if is_reserved(keyword) {
            return Err(ActivityError::ReservedKeyword(keyword.to_owned()));
        }
        if !keyword.is_empty() {
            self.keywords.insert(keyword.to_owned());
        }
        Ok(())
    }

    pub fn remove_keyword(&mut self, keyword: &str) {
        self.keywords.remove(keyword.trim());
    }

    pub fn public(&self) -> bool {
        self.public
    }

    pub fn set_public(&mut self, public: bool) {
        self.public = public;
    }

    /// Kind of activity, `Cycling` unless told otherwise.
    pub fn what(&self) -> ActivityKind {
        self.what
    }

    pub fn set_what(&mut self, what: ActivityKind) {
        self.what = what;
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.track.is_some()
    }

    /// The track if it is already in memory. Never triggers a fetch.
    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// Time range and point count without fetching: computed from the track
    /// when loaded, otherwise whatever the backend listing reported.
    pub fn summary(&self) -> Option<TrackSummary> {
        match &self.track {
            Some(track) => track.summary(),
            None => self.summary,
        }
    }

    /// True if the time range is known without fetching the track.
    pub fn has_summary(&self) -> bool {
        self.track.is_some() || self.summary.is_some()
    }

    /// Fetch the track from the owning backend if not done yet.
    ///
    /// Repeated calls after the first successful one are no-ops.
    pub async fn load(&mut self) -> Result<&Track, BackendError> {
        let track = match self.track.take() {
            Some(track) => track,
            None => {
                let track = self.fetch_track().await?;
                self.state = LoadState::Loaded;
                track
            }
        };
        Ok(&*self.track.insert(track))
    }

    /// A complete, unbound copy with its own track buffer.
    /// Loads the track first if this activity is header-only.
    pub async fn clone_full(&mut self) -> Result<Activity, BackendError> {
        let track = self.load().await?.clone();
        Ok(Activity {
            id: None,
            title: self.title.clone(),
            description: self.description.clone(),
            keywords: self.keywords.clone(),
            public: self.public,
            what: self.what,
            summary: None,
            track: Some(track),
            state: LoadState::Unbound,
            backend: None,
        })
    }

    /// All metadata as an update that would reproduce it elsewhere.
    pub fn metadata(&self) -> MetadataUpdate {
        MetadataUpdate {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            keywords: Some(self.keywords.iter().cloned().collect()),
            public: Some(self.public),
            what: Some(self.what),
        }
    }

    /// Apply an update to the in-memory copy only.
    pub(crate) fn apply(&mut self, update: &MetadataUpdate) -> Result<(), ActivityError> {
        if let Some(keywords) = &update.keywords {
            self.keywords = normalize_keywords(keywords)?;
        }
        if let Some(title) = &update.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &update.description {
            self.description.clone_from(description);
        }
        if let Some(public) = update.public {
            self.public = public;
        }
        if let Some(what) = update.what {
            self.what = what;
        }
        Ok(())
    }

    async fn fetch_track(&self) -> Result<Track, BackendError> {
        let id = self.id.as_ref().ok_or(BackendError::Detached)?;
        let backend = self
            .backend
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(BackendError::Detached)?;

        tracing::debug!(backend = backend.label(), activity = %id, "loading full track");
        backend.fetch(id).await
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activity(")?;
        if let Some(id) = &self.id {
            write!(f, "id:{id} ")?;
        }
        if !self.title.is_empty() {
            write!(f, "{} ", self.title)?;
        }
        match self.summary() {
            Some(summary) => write!(
                f,
                "{} {} points)",
                summary.time_range, summary.point_count
            ),
            None => write!(f, "no points)"),
        }
    }
}

/// A change to an activity's metadata. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what: Option<ActivityKind>,
}

impl MetadataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = Some(public);
        self
    }

    pub fn what(mut self, what: ActivityKind) -> Self {
        self.what = Some(what);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.keywords.is_none()
            && self.public.is_none()
            && self.what.is_none()
    }

    pub fn touches_visibility(&self) -> bool {
        self.public.is_some()
    }

    /// Reject reserved keywords before anything is written.
    pub fn validate(&self) -> Result<(), ActivityError> {
        if let Some(keywords) = &self.keywords {
            normalize_keywords(keywords)?;
        }
        Ok(())
    }
}

fn is_reserved(keyword: &str) -> bool {
    RESERVED_KEYWORD_PREFIXES
        .iter()
        .any(|prefix| keyword.starts_with(prefix))
}

fn normalize_keywords<I, S>(keywords: I) -> Result<BTreeSet<String>, ActivityError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result = BTreeSet::new();
    for keyword in keywords {
        let keyword = keyword.as_ref().trim();
        if is_reserved(keyword) {
            return Err(ActivityError::ReservedKeyword(keyword.to_owned()));
        }
        if !keyword.is_empty() {
            result.insert(keyword.to_owned());
        }
    }
    Ok(result)
}
