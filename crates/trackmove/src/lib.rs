pub mod activity;
pub mod backend;
pub mod collection;
pub mod diff;
pub mod kind;
pub mod retry;
pub mod sync;
pub mod track;

pub use activity::{Activity, ActivityError, ActivityHeader, ActivityId, LoadState, MetadataUpdate};
pub use backend::{Backend, BackendError, Capabilities, Capability};
pub use collection::Collection;
pub use kind::ActivityKind;
pub use diff::{
    ActivityRef, BackendDiff, Classification, DiffEntry, MatchPolicy, MatchTolerance, MatchedPair,
    Matcher, Overlap, Side, diff,
};
pub use retry::{RetryPolicy, RetryingBackend};
pub use sync::{
    CopiedActivity, PlannedCopy, SyncError, SyncFailure, SyncOptions, SyncReport, SyncStage, sync,
};
pub use track::{Point, TimeRange, Track, TrackError, TrackSummary};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
