//! One-directional transfer of activities between two backends.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::activity::ActivityId;
use crate::backend::{BackendError, Capability};
use crate::collection::Collection;
use crate::diff::{ActivityRef, MatchPolicy, MatchedPair, Matcher, Overlap};
use crate::track::TrackSummary;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Compute the plan without writing anything.
    pub dry_run: bool,
    /// Remove each activity from the source once its copy is verified.
    pub remove_after_copy: bool,
    /// Leave matched pairs alone. When false, matched activities are copied
    /// again and the previous target copy is replaced.
    pub skip_matched: bool,
    pub policy: MatchPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            remove_after_copy: false,
            skip_matched: true,
            policy: MatchPolicy::default(),
        }
    }
}

/// Where in a unit of work a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Load,
    Save,
    Verify,
    RemoveReplaced,
    RemoveSource,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Save => write!(f, "save"),
            Self::Verify => write!(f, "verify"),
            Self::RemoveReplaced => write!(f, "remove replaced copy"),
            Self::RemoveSource => write!(f, "remove from source"),
        }
    }
}

/// A copy that would be made, or was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    pub activity: ActivityRef,
    /// The target copy this one replaces, for re-copied matched pairs.
    pub replaces: Option<ActivityRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedActivity {
    pub source: ActivityRef,
    pub target_id: ActivityId,
    pub replaced: Option<ActivityId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    pub activity: ActivityRef,
    pub stage: SyncStage,
    pub error: BackendError,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) failed at {}: {}",
            self.activity.title, self.activity.id, self.stage, self.error
        )
    }
}

/// Outcome of a sync run. Failed units do not abort the run; they are
/// collected here next to the ones that went through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub source_label: String,
    pub target_label: String,
    pub copied: Vec<CopiedActivity>,
    /// Filled on dry runs only.
    pub planned: Vec<PlannedCopy>,
    pub removed_from_source: Vec<ActivityId>,
    pub failed: Vec<SyncFailure>,
    /// Overlapping candidates, left for manual resolution.
    pub unresolved: Vec<Overlap>,
    /// Matched pairs that needed no transfer.
    pub skipped: Vec<MatchedPair>,
    /// The run stopped early on cancellation; remaining units did not run.
    pub cancelled: bool,
}

impl SyncReport {
    fn new(source_label: &str, target_label: &str) -> Self {
        Self {
            source_label: source_label.to_owned(),
            target_label: target_label.to_owned(),
            ..Self::default()
        }
    }

    /// Nothing failed, nothing needs attention, and the run finished.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unresolved.is_empty() && !self.cancelled
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: ", self.source_label, self.target_label)?;
        if self.planned.is_empty() {
            write!(f, "copied {}", self.copied.len())?;
        } else {
            write!(f, "would copy {}", self.planned.len())?;
        }
        write!(
            f,
            ", removed from source {}, failed {}, unresolved {}, skipped {}",
            self.removed_from_source.len(),
            self.failed.len(),
            self.unresolved.len(),
            self.skipped.len()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("could not compare backends: {0}")]
    Diff(#[source] BackendError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Copy every activity of `source` that has no match in `target`.
///
/// Each copy is verified against a fresh listing of the target before the
/// source is touched; a copy that cannot be verified is removed again. Overlapping candidates are reported, never acted on.
/// Activities without points are not copied, as they could never be
/// matched afterwards. `cancel` is checked between units; a unit in
/// progress always finishes.
pub async fn sync(
    source: &mut Collection,
    target: &mut Collection,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<SyncReport, SyncError> {
    if !options.dry_run {
        if !target.backend().supports(Capability::Save) {
            return Err(BackendError::unsupported(target.label(), Capability::Save).into());
        }
        if options.remove_after_copy && !source.backend().supports(Capability::Remove) {
            return Err(BackendError::unsupported(source.label(), Capability::Remove).into());
        }
    }

    let matcher = Matcher::new(options.policy.clone());
    let diff = matcher
        .diff(source, target)
        .await
        .map_err(SyncError::Diff)?;

    let mut report = SyncReport::new(source.label(), target.label());
    report.unresolved = diff.overlaps;

    let mut units: Vec<PlannedCopy> = diff
        .left_only
        .into_iter()
        .filter(|activity| activity.time_range.is_some())
        .map(|activity| PlannedCopy {
            activity,
            replaces: None,
        })
        .collect();
    if options.skip_matched {
        report.skipped = diff.matched;
    } else {
        units.extend(diff.matched.into_iter().map(|pair| PlannedCopy {
            activity: pair.left,
            replaces: Some(pair.right),
        }));
        units.sort_by_key(|unit| (unit.activity.start(), unit.activity.id.clone()));
    }

    if options.dry_run {
        report.planned = units;
        tracing::info!(%report, "dry run");
        return Ok(report);
    }

    for unit in units {
        if cancel.is_cancelled() {
            tracing::warn!(
                from = %report.source_label,
                to = %report.target_label,
                "sync cancelled"
            );
            report.cancelled = true;
            break;
        }

        match copy_unit(&matcher, source, target, &unit).await {
            Ok(copied) => report.copied.push(copied),
            Err(failure) => {
                tracing::warn!(
                    activity = %failure.activity.id,
                    stage = %failure.stage,
                    error = %failure.error,
                    "sync unit failed"
                );
                report.failed.push(failure);
                continue;
            }
        }

        if options.remove_after_copy {
            match source.remove(&unit.activity.id).await {
                Ok(()) => report.removed_from_source.push(unit.activity.id.clone()),
                Err(error) => report.failed.push(SyncFailure {
                    activity: unit.activity,
                    stage: SyncStage::RemoveSource,
                    error,
                }),
            }
        }
    }

    tracing::info!(%report, "sync finished");
    Ok(report)
}

/// Load, save, verify, and replace the old copy if there is one.
async fn copy_unit(
    matcher: &Matcher,
    source: &mut Collection,
    target: &mut Collection,
    unit: &PlannedCopy,
) -> Result<CopiedActivity, SyncFailure> {
    let fail = |stage: SyncStage| {
        move |error: BackendError| SyncFailure {
            activity: unit.activity.clone(),
            stage,
            error,
        }
    };

    let activity = source
        .find_mut(&unit.activity.id)
        .await
        .map_err(fail(SyncStage::Load))?
        .ok_or_else(|| fail(SyncStage::Load)(BackendError::NotFound(unit.activity.id.clone())))?;
    activity.load().await.map_err(fail(SyncStage::Load))?;
    let expected = activity.summary();

    let target_id = target.save(activity).await.map_err(fail(SyncStage::Save))?;

    if let Err(error) = verify_copy(matcher, target, &target_id, expected).await {
        rollback(target, &target_id).await;
        return Err(fail(SyncStage::Verify)(error));
    }

    let replaced = match &unit.replaces {
        Some(old) => {
            target
                .remove(&old.id)
                .await
                .map_err(fail(SyncStage::RemoveReplaced))?;
            Some(old.id.clone())
        }
        None => None,
    };

    tracing::info!(
        from = source.label(),
        to = target.label(),
        activity = %unit.activity.id,
        %target_id,
        "copied activity"
    );
    Ok(CopiedActivity {
        source: unit.activity.clone(),
        target_id,
        replaced,
    })
}

/// Read the copy back from a fresh target listing and compare it with the
/// source summary. The track is fetched only when the listing has no
/// summary for it.
async fn verify_copy(
    matcher: &Matcher,
    target: &mut Collection,
    id: &ActivityId,
    expected: Option<TrackSummary>,
) -> Result<(), BackendError> {
    target.invalidate();
    let listed = target.find(id).await?.map(|copy| copy.summary());
    let saved = match listed {
        None => {
            return Err(BackendError::DataIntegrity(format!(
                "copy {id} is missing from the {} listing",
                target.label()
            )));
        }
        Some(Some(summary)) => Some(summary),
        Some(None) => {
            if !target.backend().supports(Capability::Fetch) {
                return Err(BackendError::unsupported(target.label(), Capability::Fetch));
            }
            target.backend().fetch(id).await?.summary()
        }
    };

    match (expected, saved) {
        (Some(expected), Some(saved)) if matcher.is_match(&expected, &saved) => Ok(()),
        _ => Err(BackendError::DataIntegrity(format!(
            "copy {id} in {} does not match its source",
            target.label()
        ))),
    }
}

/// Remove a copy that failed verification, if the target allows it.
async fn rollback(target: &mut Collection, id: &ActivityId) {
    if !target.backend().supports(Capability::Remove) {
        tracing::warn!(
            to = target.label(),
            activity = %id,
            "unverified copy left in place, target cannot remove"
        );
        return;
    }
    match target.remove(id).await {
        Ok(()) => tracing::warn!(to = target.label(), activity = %id, "rolled back unverified copy"),
        Err(err) => tracing::warn!(
            to = target.label(),
            activity = %id,
            error = %err,
            "rollback of unverified copy failed"
        ),
    }
}
