//! Matching activities across two backends.
//!
//! There is no global activity identity, so correspondence is judged from
//! time ranges and point counts. Listings usually carry both; full tracks
//! are only fetched when a listing lacks them or when the header data cannot
//! tell candidates apart.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::activity::{Activity, ActivityId};
use crate::backend::BackendError;
use crate::collection::Collection;
use crate::track::{TimeRange, TrackSummary};

/// How far two activities may differ and still count as the same recording.
///
/// Services truncate sub-second precision and drop duplicate leading or
/// trailing points, so exact equality is too strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchTolerance {
    /// Maximum difference of start times and of last times.
    pub time: Duration,
    /// Maximum difference of point counts.
    pub points: usize,
}

impl Default for MatchTolerance {
    fn default() -> Self {
        Self {
            time: Duration::seconds(2),
            points: 2,
        }
    }
}

impl MatchTolerance {
    pub fn exact() -> Self {
        Self {
            time: Duration::zero(),
            points: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchPolicy {
    pub tolerance: MatchTolerance,
    /// Compare routes of every header match, not only ambiguous ones.
    pub verify_routes: bool,
    /// Maximum distance between sampled positions for routes to match.
    pub route_tolerance_m: f64,
    /// Added to right-hand times before comparing, for data recorded with
    /// a known clock or time-zone offset.
    pub right_offset: Duration,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            tolerance: MatchTolerance::default(),
            verify_routes: false,
            route_tolerance_m: 50.0,
            right_offset: Duration::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Snapshot of the activity data a diff was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRef {
    pub id: ActivityId,
    pub title: String,
    /// `None` for activities without points.
    pub time_range: Option<TimeRange>,
    pub point_count: usize,
}

impl ActivityRef {
    fn of(activity: &Activity) -> Option<Self> {
        let id = activity.id()?.clone();
        let summary = activity.summary();
        Some(Self {
            id,
            title: activity.title().to_owned(),
            time_range: summary.map(|s| s.time_range),
            point_count: summary.map_or(0, |s| s.point_count),
        })
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.time_range.map(|r| r.start)
    }
}

/// One activity from each side judged to be the same recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub left: ActivityRef,
    pub right: ActivityRef,
}

/// Two activities whose time ranges intersect without being a match.
/// Usually a partial copy left by an interrupted transfer; needs a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub left: ActivityRef,
    pub right: ActivityRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    LeftOnly,
    RightOnly,
    Matched,
    Overlapping,
}

/// A diff result entry, for walking the whole result in time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffEntry<'a> {
    Matched(&'a MatchedPair),
    LeftOnly(&'a ActivityRef),
    RightOnly(&'a ActivityRef),
    Overlapping(&'a Overlap),
}

impl DiffEntry<'_> {
    fn start(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Matched(pair) => pair.left.start(),
            Self::LeftOnly(a) | Self::RightOnly(a) => a.start(),
            Self::Overlapping(o) => match (o.left.start(), o.right.start()) {
                (Some(l), Some(r)) => Some(l.min(r)),
                (l, r) => l.or(r),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Matched(_) => 0,
            Self::Overlapping(_) => 1,
            Self::LeftOnly(_) => 2,
            Self::RightOnly(_) => 3,
        }
    }
}

/// Comparison of two backends at one point in time.
///
/// Every listed activity of either side is in exactly one class: matched,
/// overlapping (unmatched but intersecting something on the other side),
/// or side-only. An activity in a matched pair may still appear as the
/// counterpart in an [`Overlap`] with another, unmatched activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendDiff {
    pub left_label: String,
    pub right_label: String,
    pub matched: Vec<MatchedPair>,
    pub left_only: Vec<ActivityRef>,
    pub right_only: Vec<ActivityRef>,
    pub overlaps: Vec<Overlap>,
}

impl BackendDiff {
    /// True if both sides hold the same recordings with nothing ambiguous.
    pub fn is_identical(&self) -> bool {
        self.left_only.is_empty() && self.right_only.is_empty() && self.overlaps.is_empty()
    }

    pub fn classify(&self, side: Side, id: &ActivityId) -> Option<Classification> {
        let pick = |pair_left: &ActivityRef, pair_right: &ActivityRef| match side {
            Side::Left => pair_left.id == *id,
            Side::Right => pair_right.id == *id,
        };

        if self.matched.iter().any(|p| pick(&p.left, &p.right)) {
            return Some(Classification::Matched);
        }
        if self.overlaps.iter().any(|o| pick(&o.left, &o.right)) {
            return Some(Classification::Overlapping);
        }
        let (only, class) = match side {
            Side::Left => (&self.left_only, Classification::LeftOnly),
            Side::Right => (&self.right_only, Classification::RightOnly),
        };
        only.iter().any(|a| a.id == *id).then_some(class)
    }

    /// Unmatched activities of one side that intersect the other side.
    pub fn overlapping(&self, side: Side) -> Vec<&ActivityRef> {
        let mut result: Vec<&ActivityRef> = Vec::new();
        for overlap in &self.overlaps {
            let candidate = match side {
                Side::Left => &overlap.left,
                Side::Right => &overlap.right,
            };
            if self.classify(side, &candidate.id) == Some(Classification::Overlapping)
                && !result.iter().any(|a| a.id == candidate.id)
            {
                result.push(candidate);
            }
        }
        result
    }

    /// All entries ordered by start time.
    pub fn entries(&self) -> Vec<DiffEntry<'_>> {
        let mut entries: Vec<DiffEntry<'_>> = self
            .matched
            .iter()
            .map(DiffEntry::Matched)
            .chain(self.overlaps.iter().map(DiffEntry::Overlapping))
            .chain(self.left_only.iter().map(DiffEntry::LeftOnly))
            .chain(self.right_only.iter().map(DiffEntry::RightOnly))
            .collect();
        entries.sort_by(|a, b| {
            compare_starts(a.start(), b.start()).then_with(|| a.rank().cmp(&b.rank()))
        });
        entries
    }
}

/// Compares backends according to a [`MatchPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    policy: MatchPolicy,
}

/// A pair of activities whose time ranges intersect.
struct Candidate {
    left: usize,
    right: usize,
    within: bool,
    score: i64,
}

impl Matcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// True if two summaries are within tolerance of each other.
    /// `right` is compared as is; the policy offset is not applied here.
    pub fn is_match(&self, left: &TrackSummary, right: &TrackSummary) -> bool {
        let tolerance = &self.policy.tolerance;
        left.time_range.intersects(&right.time_range)
            && abs(left.time_range.start - right.time_range.start) <= tolerance.time
            && abs(left.time_range.end - right.time_range.end) <= tolerance.time
            && left.point_count.abs_diff(right.point_count) <= tolerance.points
    }

    /// Combined difference used to rank candidates: milliseconds of start
    /// and last time difference, plus one second per differing point.
    pub fn difference(&self, left: &TrackSummary, right: &TrackSummary) -> i64 {
        let points = i64::try_from(left.point_count.abs_diff(right.point_count)).unwrap_or(i64::MAX);
        abs(left.time_range.start - right.time_range.start)
            .num_milliseconds()
            .saturating_add(abs(left.time_range.end - right.time_range.end).num_milliseconds())
            .saturating_add(points.saturating_mul(1000))
    }

    /// Classify every activity of `left` and `right`.
    ///
    /// Only the in-memory caches of the collections change (listings and
    /// escalated track loads); nothing is written to either backend. The
    /// first backend error aborts the diff.
    pub async fn diff(
        &self,
        left: &mut Collection,
        right: &mut Collection,
    ) -> Result<BackendDiff, BackendError> {
        let left_label = left.label().to_owned();
        let right_label = right.label().to_owned();
        load_missing_summaries(left).await?;
        load_missing_summaries(right).await?;

        let mut candidates = self.candidates(left.activities().await?, right.activities().await?);
        self.verify_routes(left, right, &mut candidates).await?;

        let left_acts = left.activities().await?;
        let right_acts = right.activities().await?;
        let selected = select_matches(&candidates, left_acts, right_acts);

        let mut diff = BackendDiff {
            left_label,
            right_label,
            ..BackendDiff::default()
        };
        let left_refs: Vec<Option<ActivityRef>> = left_acts.iter().map(ActivityRef::of).collect();
        let right_refs: Vec<Option<ActivityRef>> = right_acts.iter().map(ActivityRef::of).collect();

        let mut left_used = vec![false; left_refs.len()];
        let mut right_used = vec![false; right_refs.len()];
        for (index, candidate) in candidates.iter().enumerate() {
            let (Some(l), Some(r)) = (&left_refs[candidate.left], &right_refs[candidate.right])
            else {
                continue;
            };
            left_used[candidate.left] = true;
            right_used[candidate.right] = true;
            if selected.contains(&index) {
                diff.matched.push(MatchedPair {
                    left: l.clone(),
                    right: r.clone(),
                });
            } else {
                diff.overlaps.push(Overlap {
                    left: l.clone(),
                    right: r.clone(),
                });
            }
        }

        diff.left_only = unused(left_refs, &left_used);
        diff.right_only = unused(right_refs, &right_used);

        diff.matched.sort_by(|a, b| compare_refs(&a.left, &b.left));
        diff.overlaps.sort_by(|a, b| {
            compare_refs(&a.left, &b.left).then_with(|| compare_refs(&a.right, &b.right))
        });
        diff.left_only.sort_by(compare_refs);
        diff.right_only.sort_by(compare_refs);

        tracing::debug!(
            left = %diff.left_label,
            right = %diff.right_label,
            matched = diff.matched.len(),
            left_only = diff.left_only.len(),
            right_only = diff.right_only.len(),
            overlaps = diff.overlaps.len(),
            "computed diff"
        );
        Ok(diff)
    }

    fn candidates(&self, left: &[Activity], right: &[Activity]) -> Vec<Candidate> {
        let right_summaries: Vec<Option<TrackSummary>> = right
            .iter()
            .map(|a| a.summary().map(|s| self.shifted(s)))
            .collect();

        let mut candidates = Vec::new();
        for (li, activity) in left.iter().enumerate() {
            let Some(ls) = activity.summary() else {
                continue;
            };
            for (ri, rs) in right_summaries.iter().enumerate() {
                let Some(rs) = rs else {
                    continue;
                };
                if !ls.time_range.intersects(&rs.time_range) {
                    continue;
                }
                candidates.push(Candidate {
                    left: li,
                    right: ri,
                    within: self.is_match(&ls, rs),
                    score: self.difference(&ls, rs),
                });
            }
        }
        candidates
    }

    /// Compare routes of header matches that cannot be trusted on their own:
    /// all of them when the policy asks, otherwise those competing with
    /// another within-tolerance candidate for the same activity.
    async fn verify_routes(
        &self,
        left: &mut Collection,
        right: &mut Collection,
        candidates: &mut [Candidate],
    ) -> Result<(), BackendError> {
        let mut left_hits: HashMap<usize, usize> = HashMap::new();
        let mut right_hits: HashMap<usize, usize> = HashMap::new();
        for c in candidates.iter().filter(|c| c.within) {
            *left_hits.entry(c.left).or_default() += 1;
            *right_hits.entry(c.right).or_default() += 1;
        }

        for candidate in candidates.iter_mut().filter(|c| c.within) {
            let ambiguous = left_hits[&candidate.left] > 1 || right_hits[&candidate.right] > 1;
            if !(ambiguous || self.policy.verify_routes) {
                continue;
            }

            tracing::debug!(
                left = left.label(),
                right = right.label(),
                ambiguous,
                "escalating to full track comparison"
            );
            load_at(left, candidate.left).await?;
            load_at(right, candidate.right).await?;

            let left_acts = left.activities().await?;
            let right_acts = right.activities().await?;
            let (Some(lt), Some(rt)) = (
                left_acts[candidate.left].track(),
                right_acts[candidate.right].track(),
            ) else {
                continue;
            };
            if !lt.route_matches(rt, self.policy.route_tolerance_m) {
                candidate.within = false;
            }
        }
        Ok(())
    }

    fn shifted(&self, summary: TrackSummary) -> TrackSummary {
        TrackSummary {
            time_range: summary.time_range.shifted(self.policy.right_offset),
            ..summary
        }
    }
}

/// Convenience wrapper around [`Matcher::diff`].
pub async fn diff(
    left: &mut Collection,
    right: &mut Collection,
    policy: &MatchPolicy,
) -> Result<BackendDiff, BackendError> {
    Matcher::new(policy.clone()).diff(left, right).await
}

/// Greedily pick the best within-tolerance candidates, each activity at
/// most once. Ties are broken by a key that does not depend on which
/// backend is left, so swapping sides selects the same pairs.
fn select_matches(candidates: &[Candidate], left: &[Activity], right: &[Activity]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].within)
        .collect();
    let key = |i: usize| {
        let c = &candidates[i];
        let l = &left[c.left];
        let r = &right[c.right];
        let earliest = match (start_of(l), start_of(r)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let lid = l.id().map(ActivityId::as_str).unwrap_or_default();
        let rid = r.id().map(ActivityId::as_str).unwrap_or_default();
        (c.score, earliest, lid.min(rid), lid.max(rid))
    };
    order.sort_by_key(|&i| key(i));

    let mut left_taken = vec![false; left.len()];
    let mut right_taken = vec![false; right.len()];
    let mut selected = Vec::new();
    for i in order {
        let c = &candidates[i];
        if left_taken[c.left] || right_taken[c.right] {
            continue;
        }
        left_taken[c.left] = true;
        right_taken[c.right] = true;
        selected.push(i);
    }
    selected
}

async fn load_missing_summaries(collection: &mut Collection) -> Result<(), BackendError> {
    let label = collection.label().to_owned();
    for activity in collection.activities_mut().await? {
        if !activity.has_summary() {
            tracing::debug!(
                backend = %label,
                activity = ?activity.id(),
                "listing has no time range, loading full track"
            );
            activity.load().await?;
        }
    }
    Ok(())
}

async fn load_at(collection: &mut Collection, index: usize) -> Result<(), BackendError> {
    if let Some(activity) = collection.get_mut(index).await? {
        activity.load().await?;
    }
    Ok(())
}

fn unused(refs: Vec<Option<ActivityRef>>, used: &[bool]) -> Vec<ActivityRef> {
    refs.into_iter()
        .zip(used)
        .filter_map(|(r, &used)| if used { None } else { r })
        .collect()
}

fn start_of(activity: &Activity) -> Option<DateTime<Utc>> {
    activity.summary().map(|s| s.time_range.start)
}

fn abs(delta: Duration) -> Duration {
    if delta < Duration::zero() { -delta } else { delta }
}

/// Activities without a time range sort last.
fn compare_starts(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_refs(a: &ActivityRef, b: &ActivityRef) -> Ordering {
    compare_starts(a.start(), b.start()).then_with(|| a.id.cmp(&b.id))
}
