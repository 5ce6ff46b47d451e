//! JSON bodies exchanged with the tracking service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trackmove::{
    Activity, ActivityHeader, ActivityId, ActivityKind, Point, TimeRange, Track, TrackSummary,
};

/// One entry of `GET /activities`.
#[derive(Debug, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub what: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub point_count: Option<usize>,
}

impl ActivityEntry {
    /// The time range is only trusted when the service reports all of it.
    /// A kind outside the known vocabulary falls back to the default.
    pub fn into_header(self) -> ActivityHeader {
        let what = match self.what.as_deref().map(ActivityKind::parse) {
            Some(Ok(kind)) => kind,
            Some(Err(err)) => {
                tracing::warn!(activity = %self.id, error = %err, "using default activity kind");
                ActivityKind::default()
            }
            None => ActivityKind::default(),
        };
        let summary = match (self.start_time, self.end_time, self.point_count) {
            (Some(start), Some(end), Some(point_count)) if point_count > 0 => Some(TrackSummary {
                time_range: TimeRange::new(start, end),
                point_count,
            }),
            _ => None,
        };
        ActivityHeader {
            id: ActivityId::new(self.id),
            title: self.title,
            description: self.description.unwrap_or_default(),
            keywords: self.keywords,
            public: self.public,
            what,
            summary,
        }
    }
}

/// One element of `GET /activities/{id}/points`, also used for uploads.
#[derive(Debug, Serialize, Deserialize)]
pub struct PointEntry {
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ele: Option<f64>,
}

impl From<&Point> for PointEntry {
    fn from(point: &Point) -> Self {
        Self {
            time: point.time(),
            lat: point.latitude(),
            lon: point.longitude(),
            ele: point.elevation(),
        }
    }
}

impl From<PointEntry> for Point {
    fn from(entry: PointEntry) -> Self {
        let point = Point::new(entry.time, entry.lat, entry.lon);
        match entry.ele {
            Some(ele) => point.with_elevation(ele),
            None => point,
        }
    }
}

/// Body of `POST /activities`.
#[derive(Debug, Serialize)]
pub struct NewActivity<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub keywords: Vec<&'a str>,
    pub public: bool,
    pub what: &'static str,
    pub points: Vec<PointEntry>,
}

impl<'a> NewActivity<'a> {
    pub fn new(activity: &'a Activity, track: &Track) -> Self {
        Self {
            title: activity.title(),
            description: activity.description(),
            keywords: activity.keywords(),
            public: activity.public(),
            what: activity.what().as_str(),
            points: track.points().iter().map(PointEntry::from).collect(),
        }
    }
}

/// Response of `POST /activities`.
#[derive(Debug, Deserialize)]
pub struct Created {
    pub id: String,
}
