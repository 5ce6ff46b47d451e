use std::sync::Arc;

use crate::activity::{Activity, ActivityHeader, ActivityId, MetadataUpdate};
use crate::backend::{Backend, BackendError, Capability, check_update_supported};

/// Sequence view over the activities of one backend.
///
/// The listing is fetched on first access and cached; [`invalidate`] drops
/// the cache so the next access lists again. Another process writing to
/// the same backend is not noticed until then.
///
/// [`invalidate`]: Collection::invalidate
pub struct Collection {
    backend: Arc<dyn Backend>,
    activities: Vec<Activity>,
    listed: bool,
}

impl Collection {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            activities: Vec::new(),
            listed: false,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn label(&self) -> &str {
        self.backend.label()
    }

    /// Forget the cached listing.
    pub fn invalidate(&mut self) {
        self.listed = false;
    }

    /// List the backend unless the cached listing is still valid.
    ///
    /// Activities already loaded in the cache keep their tracks if the
    /// backend still reports them.
    pub async fn refresh(&mut self) -> Result<(), BackendError> {
        if self.listed {
            return Ok(());
        }

        let headers = self.backend.list().await?;
        tracing::debug!(
            backend = self.backend.label(),
            count = headers.len(),
            "listed activities"
        );

        let mut previous = std::mem::take(&mut self.activities);
        let weak = Arc::downgrade(&self.backend);
        self.activities = headers
            .into_iter()
            .map(|header| {
                match previous
                    .iter()
                    .position(|a| a.id() == Some(&header.id) && a.is_loaded())
                {
                    Some(pos) => previous.swap_remove(pos),
                    None => Activity::from_header(header, weak.clone()),
                }
            })
            .collect();
        self.listed = true;
        Ok(())
    }

    pub async fn len(&mut self) -> Result<usize, BackendError> {
        self.refresh().await?;
        Ok(self.activities.len())
    }

    pub async fn is_empty(&mut self) -> Result<bool, BackendError> {
        Ok(self.len().await? == 0)
    }

    /// Membership by identifier. Does not load any track.
    pub async fn contains(&mut self, id: &ActivityId) -> Result<bool, BackendError> {
        self.refresh().await?;
        Ok(self.position(id).is_some())
    }

    pub async fn get(&mut self, index: usize) -> Result<Option<&Activity>, BackendError> {
        self.refresh().await?;
        Ok(self.activities.get(index))
    }

    pub async fn get_mut(&mut self, index: usize) -> Result<Option<&mut Activity>, BackendError> {
        self.refresh().await?;
        Ok(self.activities.get_mut(index))
    }

    pub async fn find(&mut self, id: &ActivityId) -> Result<Option<&Activity>, BackendError> {
        self.refresh().await?;
        Ok(self.position(id).map(|pos| &self.activities[pos]))
    }

    pub async fn find_mut(
        &mut self,
        id: &ActivityId,
    ) -> Result<Option<&mut Activity>, BackendError> {
        self.refresh().await?;
        Ok(self.position(id).map(|pos| &mut self.activities[pos]))
    }

    pub async fn activities(&mut self) -> Result<&[Activity], BackendError> {
        self.refresh().await?;
        Ok(&self.activities)
    }

    pub async fn activities_mut(&mut self) -> Result<&mut [Activity], BackendError> {
        self.refresh().await?;
        Ok(&mut self.activities)
    }

    /// Load the full track of the activity with this id, if present.
    pub async fn load(&mut self, id: &ActivityId) -> Result<&Activity, BackendError> {
        let activity = self
            .find_mut(id)
            .await?
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        activity.load().await?;
        Ok(&*activity)
    }

    /// Save an activity into this backend and return the issued id.
    ///
    /// The activity may be unbound or live in any backend; its track is
    /// loaded from there first. The activity itself is left untouched and
    /// a new header-only entry for the saved copy joins the listing.
    pub async fn save(&mut self, activity: &mut Activity) -> Result<ActivityId, BackendError> {
        if !self.backend.supports(Capability::Save) {
            return Err(BackendError::unsupported(self.label(), Capability::Save));
        }
        activity.load().await?;
        let id = self.backend.save(activity).await?;
        tracing::info!(backend = self.label(), activity = %id, title = activity.title(), "saved activity");

        if self.listed {
            // No summary: the backend may have altered the track, so it is
            // read back from there when needed.
            let header = ActivityHeader {
                id: id.clone(),
                title: activity.title().to_owned(),
                description: activity.description().to_owned(),
                keywords: activity.keywords().into_iter().map(str::to_owned).collect(),
                public: activity.public(),
                what: activity.what(),
                summary: None,
            };
            self.activities
                .push(Activity::from_header(header, Arc::downgrade(&self.backend)));
        }
        Ok(id)
    }

    pub async fn remove(&mut self, id: &ActivityId) -> Result<(), BackendError> {
        if !self.backend.supports(Capability::Remove) {
            return Err(BackendError::unsupported(self.label(), Capability::Remove));
        }
        self.backend.remove(id).await?;
        tracing::info!(backend = self.label(), activity = %id, "removed activity");
        if let Some(pos) = self.position(id) {
            self.activities.remove(pos);
        }
        Ok(())
    }

    /// Remove every activity currently listed.
    ///
    /// Activities added to the backend by someone else since the last
    /// listing are not seen; call [`invalidate`](Collection::invalidate)
    /// first to be sure the backend ends up empty.
    pub async fn remove_all(&mut self) -> Result<usize, BackendError> {
        self.refresh().await?;
        let ids: Vec<ActivityId> = self
            .activities
            .iter()
            .filter_map(|a| a.id().cloned())
            .collect();
        for id in &ids {
            self.remove(id).await?;
        }
        Ok(ids.len())
    }

    /// Change metadata of a listed activity, in the backend and in the cache.
    ///
    /// Capabilities are checked up front: an update the backend cannot
    /// fully apply is rejected before anything is written.
    pub async fn update_metadata(
        &mut self,
        id: &ActivityId,
        update: &MetadataUpdate,
    ) -> Result<(), BackendError> {
        check_update_supported(self.label(), &self.backend.capabilities(), update)?;
        update.validate()?;
        if update.is_empty() {
            return Ok(());
        }

        self.backend.update_metadata(id, update).await?;
        tracing::info!(backend = self.label(), activity = %id, "updated metadata");
        if let Some(activity) = self.find_mut(id).await? {
            activity.apply(update)?;
        }
        Ok(())
    }

    fn position(&self, id: &ActivityId) -> Option<usize> {
        self.activities.iter().position(|a| a.id() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::Capabilities;
    use crate::kind::ActivityKind;
    use crate::test_support::{InMemoryBackend, activity_between};

    use super::*;

    fn collection_with(backend: &Arc<InMemoryBackend>) -> Collection {
        Collection::new(Arc::clone(backend) as Arc<dyn Backend>)
    }

    #[tokio::test]
    async fn lists_lazily_and_once() {
        let backend = Arc::new(InMemoryBackend::new("mem"));
        let id = backend.insert(activity_between("a", "10:00", "10:30", 31));
        backend.insert(activity_between("b", "11:00", "11:20", 21));

        let mut collection = collection_with(&backend);
        assert_eq!(backend.list_count(), 0);

        assert_eq!(collection.len().await.unwrap(), 2);
        assert!(collection.contains(&id).await.unwrap());
        assert!(!collection.contains(&ActivityId::new("nope")).await.unwrap());
        assert_eq!(collection.get(1).await.unwrap().unwrap().title(), "b");
        assert!(collection.get(2).await.unwrap().is_none());
        assert_eq!(backend.list_count(), 1);
        assert_eq!(backend.fetch_count(), 0, "listing must not load tracks");
    }

    #[tokio::test]
    async fn invalidate_lists_again_and_keeps_loaded_tracks() {
        let backend = Arc::new(InMemoryBackend::new("mem"));
        let id = backend.insert(activity_between("a", "10:00", "10:30", 31));
        let mut collection = collection_with(&backend);

        collection.load(&id).await.unwrap();
        backend.insert(activity_between("b", "11:00", "11:20", 21));
        assert_eq!(collection.len().await.unwrap(), 1);

        collection.invalidate();
        assert_eq!(collection.len().await.unwrap(), 2);
        assert!(collection.find(&id).await.unwrap().unwrap().is_loaded());
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test]
    async fn save_from_other_backend_loads_first() {
        let source = Arc::new(InMemoryBackend::new("source"));
        let id = source.insert(activity_between("trip", "10:00", "10:30", 31));
        let target = Arc::new(InMemoryBackend::new("target"));

        let mut from = collection_with(&source);
        let mut to = collection_with(&target);
        to.refresh().await.unwrap();

        let activity = from.find_mut(&id).await.unwrap().unwrap();
        let new_id = to.save(activity).await.unwrap();

        assert_eq!(target.stored_track(&new_id).unwrap().len(), 31);
        assert_eq!(to.len().await.unwrap(), 1);
        assert_eq!(to.find(&new_id).await.unwrap().unwrap().title(), "trip");
        assert_eq!(source.len(), 1, "saving elsewhere must not touch the source");
    }

    #[tokio::test]
    async fn remove_drops_from_backend_and_cache() {
        let backend = Arc::new(InMemoryBackend::new("mem"));
        let id = backend.insert(activity_between("a", "10:00", "10:30", 31));
        let mut collection = collection_with(&backend);

        collection.remove(&id).await.unwrap();
        assert!(!collection.contains(&id).await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn remove_all_empties_backend() {
        let backend = Arc::new(InMemoryBackend::new("mem"));
        backend.insert(activity_between("a", "10:00", "10:30", 31));
        backend.insert(activity_between("b", "11:00", "11:30", 31));
        let mut collection = collection_with(&backend);

        assert_eq!(collection.remove_all().await.unwrap(), 2);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn visibility_update_without_capability_writes_nothing() {
        let backend = Arc::new(
            InMemoryBackend::new("no-visibility")
                .with_capabilities(Capabilities::all().without(Capability::UpdateVisibility)),
        );
        let id = backend.insert(activity_between("Original", "10:00", "10:30", 31));
        let mut collection = collection_with(&backend);

        let update = MetadataUpdate::new().title("Renamed").public(true);
        let err = collection.update_metadata(&id, &update).await.unwrap_err();

        assert_eq!(
            err,
            BackendError::unsupported("no-visibility", Capability::UpdateVisibility)
        );
        assert_eq!(backend.write_count(), 0);
        assert_eq!(backend.header(&id).unwrap().title, "Original");
        assert_eq!(collection.find(&id).await.unwrap().unwrap().title(), "Original");
    }

    #[tokio::test]
    async fn update_metadata_changes_backend_and_cache() {
        let backend = Arc::new(InMemoryBackend::new("mem"));
        let id = backend.insert(activity_between("Original", "10:00", "10:30", 31));
        let mut collection = collection_with(&backend);

        let update = MetadataUpdate::new()
            .title("Renamed")
            .keywords(["b", "a"])
            .public(true)
            .what(ActivityKind::Running);
        collection.update_metadata(&id, &update).await.unwrap();

        let header = backend.header(&id).unwrap();
        assert_eq!(header.title, "Renamed");
        assert!(header.public);
        assert_eq!(header.what, ActivityKind::Running);

        let cached = collection.find(&id).await.unwrap().unwrap();
        assert_eq!(cached.title(), "Renamed");
        assert_eq!(cached.keywords(), vec!["a", "b"]);
        assert_eq!(cached.what(), ActivityKind::Running);
    }

    #[tokio::test]
    async fn save_to_read_only_backend_is_unsupported() {
        let backend = Arc::new(InMemoryBackend::new("ro").with_capabilities(
            Capabilities::none()
                .with(Capability::List)
                .with(Capability::Fetch),
        ));
        let mut collection = collection_with(&backend);
        let mut activity = activity_between("x", "10:00", "10:10", 11);

        let err = collection.save(&mut activity).await.unwrap_err();
        assert!(err.is_unsupported());
    }
}
