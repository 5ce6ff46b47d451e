use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::backend::check_update_supported;
use crate::{
    Activity, ActivityHeader, ActivityId, Backend, BackendError, Capabilities, Capability,
    ActivityKind, MetadataUpdate, Point, Track,
};

/// In-memory backend for testing. Stores full tracks and derives headers.
///
/// Failures can be injected per title or for the next few calls, and every
/// successful operation is counted so tests can assert on writes.
pub struct InMemoryBackend {
    label: String,
    capabilities: Capabilities,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    activities: BTreeMap<ActivityId, Stored>,
    next_id: u64,
    transient_failures: u32,
    failing_titles: HashMap<String, BackendError>,
    read_failure_after_save: Option<BackendError>,
    dropped_points_on_save: usize,
    summaries_in_listing: bool,
    lists: usize,
    fetches: usize,
    saves: usize,
    removes: usize,
    updates: usize,
}

struct Stored {
    title: String,
    description: String,
    keywords: Vec<String>,
    public: bool,
    what: ActivityKind,
    track: Track,
}

impl Stored {
    fn header(&self, id: &ActivityId, with_summary: bool) -> ActivityHeader {
        ActivityHeader {
            id: id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            keywords: self.keywords.clone(),
            public: self.public,
            what: self.what,
            summary: if with_summary {
                self.track.summary()
            } else {
                None
            },
        }
    }
}

impl InMemoryBackend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            capabilities: Capabilities::all(),
            state: Mutex::new(State {
                summaries_in_listing: true,
                ..State::default()
            }),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Listings report no time range or point count, forcing full loads.
    pub fn without_listing_summaries(self) -> Self {
        self.state.lock().unwrap().summaries_in_listing = false;
        self
    }

    /// Store an activity directly, bypassing counters and failure injection.
    pub fn insert(&self, activity: Activity) -> ActivityId {
        let mut state = self.state.lock().unwrap();
        let id = next_id(&mut state);
        state.activities.insert(id.clone(), stored_from(&activity));
        id
    }

    pub fn header(&self, id: &ActivityId) -> Option<ActivityHeader> {
        let state = self.state.lock().unwrap();
        state.activities.get(id).map(|s| s.header(id, true))
    }

    pub fn stored_track(&self, id: &ActivityId) -> Option<Track> {
        let state = self.state.lock().unwrap();
        state.activities.get(id).map(|s| s.track.clone())
    }

    pub fn ids(&self) -> Vec<ActivityId> {
        self.state.lock().unwrap().activities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The next `count` calls of any kind fail with a transient error.
    pub fn fail_transiently(&self, count: u32) {
        self.state.lock().unwrap().transient_failures = count;
    }

    /// Every save of an activity with this title fails with `error`.
    pub fn fail_saves_titled(&self, title: impl Into<String>, error: BackendError) {
        self.state
            .lock()
            .unwrap()
            .failing_titles
            .insert(title.into(), error);
    }

    /// Once anything was saved, every list and fetch fails with `error`.
    pub fn fail_reads_after_save(&self, error: BackendError) {
        self.state.lock().unwrap().read_failure_after_save = Some(error);
    }

    /// Simulate a lossy service that drops trailing points on upload.
    pub fn drop_points_on_save(&self, count: usize) {
        self.state.lock().unwrap().dropped_points_on_save = count;
    }

    pub fn list_count(&self) -> usize {
        self.state.lock().unwrap().lists
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().unwrap().saves
    }

    pub fn remove_count(&self) -> usize {
        self.state.lock().unwrap().removes
    }

    /// Successful saves, removals and metadata updates.
    pub fn write_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.saves + state.removes + state.updates
    }

    fn begin(&self, capability: Capability) -> Result<MutexGuard<'_, State>, BackendError> {
        if !self.capabilities.contains(capability) {
            return Err(BackendError::unsupported(&self.label, capability));
        }
        let mut state = self.state.lock().unwrap();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(BackendError::Transient(format!(
                "{}: simulated timeout",
                self.label
            )));
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn label(&self) -> &str {
        &self.label
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn list(&self) -> Result<Vec<ActivityHeader>, BackendError> {
        let mut state = self.begin(Capability::List)?;
        check_read(&state)?;
        state.lists += 1;
        let with_summary = state.summaries_in_listing;
        Ok(state
            .activities
            .iter()
            .map(|(id, stored)| stored.header(id, with_summary))
            .collect())
    }

    async fn fetch(&self, id: &ActivityId) -> Result<Track, BackendError> {
        let mut state = self.begin(Capability::Fetch)?;
        check_read(&state)?;
        let track = state
            .activities
            .get(id)
            .map(|s| s.track.clone())
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        state.fetches += 1;
        Ok(track)
    }

    async fn save(&self, activity: &Activity) -> Result<ActivityId, BackendError> {
        let mut state = self.begin(Capability::Save)?;
        if let Some(err) = state.failing_titles.get(activity.title()) {
            return Err(err.clone());
        }
        if activity.track().is_none() {
            return Err(BackendError::Permanent("activity track is not loaded".into()));
        }

        let mut stored = stored_from(activity);
        let keep = stored.track.len().saturating_sub(state.dropped_points_on_save);
        if keep < stored.track.len() {
            stored.track = Track::new(stored.track.points()[..keep].to_vec())?;
        }

        let id = next_id(&mut state);
        state.activities.insert(id.clone(), stored);
        state.saves += 1;
        Ok(id)
    }

    async fn remove(&self, id: &ActivityId) -> Result<(), BackendError> {
        let mut state = self.begin(Capability::Remove)?;
        state
            .activities
            .remove(id)
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        state.removes += 1;
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &ActivityId,
        update: &MetadataUpdate,
    ) -> Result<(), BackendError> {
        check_update_supported(&self.label, &self.capabilities, update)?;
        update.validate()?;
        let mut state = self.begin(Capability::UpdateMetadata)?;
        let stored = state
            .activities
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;

        if let Some(title) = &update.title {
            stored.title.clone_from(title);
        }
        if let Some(description) = &update.description {
            stored.description.clone_from(description);
        }
        if let Some(keywords) = &update.keywords {
            stored.keywords.clone_from(keywords);
        }
        if let Some(public) = update.public {
            stored.public = public;
        }
        if let Some(what) = update.what {
            stored.what = what;
        }
        state.updates += 1;
        Ok(())
    }
}

fn check_read(state: &State) -> Result<(), BackendError> {
    match &state.read_failure_after_save {
        Some(err) if state.saves > 0 => Err(err.clone()),
        _ => Ok(()),
    }
}

fn next_id(state: &mut State) -> ActivityId {
    state.next_id += 1;
    ActivityId::new(state.next_id.to_string())
}

fn stored_from(activity: &Activity) -> Stored {
    Stored {
        title: activity.title().to_owned(),
        description: activity.description().to_owned(),
        keywords: activity.keywords().into_iter().map(str::to_owned).collect(),
        public: activity.public(),
        what: activity.what(),
        track: activity.track().cloned().unwrap_or_default(),
    }
}

/// `hh:mm` or `hh:mm:ss` on a fixed test day, UTC.
pub fn at(time: &str) -> DateTime<Utc> {
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    Utc.from_utc_datetime(&day.and_time(time))
}

/// `points` evenly spaced points from `start` to `end`, heading north.
pub fn track_between(start: &str, end: &str, points: usize) -> Track {
    track_heading(start, end, points, 0.0005, 0.0)
}

/// Like [`track_between`] but moving by the given degrees per point.
pub fn track_heading(start: &str, end: &str, points: usize, d_lat: f64, d_lon: f64) -> Track {
    let start = at(start);
    let span = at(end) - start;
    let steps = points.saturating_sub(1).max(1) as i32;
    let points = (0..points)
        .map(|i| {
            let i = i as i32;
            Point::new(
                start + span * i / steps,
                47.0 + f64::from(i) * d_lat,
                8.0 + f64::from(i) * d_lon,
            )
        })
        .collect();
    Track::new(points).unwrap()
}

/// A titled, unbound activity spanning `start..end`.
pub fn activity_between(title: &str, start: &str, end: &str, points: usize) -> Activity {
    Activity::new(track_between(start, end, points)).with_title(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_returns_headers_with_summaries() {
        let backend = InMemoryBackend::new("test");
        backend.insert(activity_between("Morning", "10:00", "10:30", 31));
        backend.insert(activity_between("Noon", "12:00", "12:10", 11));

        let headers = backend.list().await.unwrap();
        assert_eq!(headers.len(), 2);
        let summary = headers[0].summary.unwrap();
        assert_eq!(summary.point_count, 31);
        assert_eq!(summary.time_range.start, at("10:00"));
        assert_eq!(summary.time_range.end, at("10:30"));
    }

    #[tokio::test]
    async fn fetch_returns_not_found_for_missing_id() {
        let backend = InMemoryBackend::new("test");
        let result = backend.fetch(&ActivityId::new("missing")).await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn unsupported_capability_fails_loudly() {
        let backend = InMemoryBackend::new("read-only").with_capabilities(
            Capabilities::none()
                .with(Capability::List)
                .with(Capability::Fetch),
        );
        let activity = activity_between("x", "10:00", "10:01", 2);

        let err = backend.save(&activity).await.unwrap_err();
        assert_eq!(err, BackendError::unsupported("read-only", Capability::Save));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn injected_title_failure_only_hits_that_title() {
        let backend = InMemoryBackend::new("test");
        backend.fail_saves_titled("bad", BackendError::Permanent("rejected".into()));

        assert!(backend.save(&activity_between("bad", "10:00", "10:01", 2)).await.is_err());
        assert!(backend.save(&activity_between("good", "11:00", "11:01", 2)).await.is_ok());
        assert_eq!(backend.save_count(), 1);
    }

    #[tokio::test]
    async fn lossy_save_drops_trailing_points() {
        let backend = InMemoryBackend::new("lossy");
        backend.drop_points_on_save(2);

        let id = backend
            .save(&activity_between("x", "10:00", "10:30", 31))
            .await
            .unwrap();
        assert_eq!(backend.stored_track(&id).unwrap().len(), 29);
    }

    #[test]
    fn track_helpers_space_points_evenly() {
        let track = track_between("10:00", "10:30", 31);
        assert_eq!(track.len(), 31);
        assert_eq!(track.points()[1].time(), at("10:01"));
        assert_eq!(track.last_time(), Some(at("10:30")));
        assert_eq!(at("10:29:59").timestamp() + 1, at("10:30").timestamp());
    }
}
