use std::fmt;

use chrono::{DateTime, Duration, Utc};
use geo::{Distance, Haversine};
use serde::{Deserialize, Serialize};

/// Number of evenly spaced positions compared by [`Track::route_matches`].
const ROUTE_SAMPLES: usize = 10;

/// Errors raised when a point sequence violates the track invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    #[error("point {index} at {found} is earlier than the preceding point at {previous}")]
    OutOfOrder {
        index: usize,
        previous: DateTime<Utc>,
        found: DateTime<Utc>,
    },
}

/// A single recorded position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    time: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    elevation: Option<f64>,
}

impl Point {
    pub fn new(time: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            time,
            latitude,
            longitude,
            elevation: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn elevation(&self) -> Option<f64> {
        self.elevation
    }

    fn as_geo(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// Closed interval between the first and the last timestamp of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// True if both ranges share at least one instant.
    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn shifted(&self, offset: Duration) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%H:%M:%S")
        )
    }
}

/// What a backend listing can tell about a track without transferring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub time_range: TimeRange,
    pub point_count: usize,
}

/// Points ordered by non-decreasing timestamp.
///
/// The order is validated on construction and on every append. A sequence
/// that goes back in time is rejected, never re-sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    points: Vec<Point>,
}

impl Track {
    pub fn new(points: Vec<Point>) -> Result<Self, TrackError> {
        check_order(None, &points, 0)?;
        Ok(Self { points })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append points after the current last one. Nothing is appended if any
    /// of them breaks the order.
    pub fn extend(&mut self, points: Vec<Point>) -> Result<(), TrackError> {
        check_order(self.points.last(), &points, self.points.len())?;
        self.points.extend(points);
        Ok(())
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(Point::time)
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(Point::time)
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        Some(TimeRange::new(self.start_time()?, self.last_time()?))
    }

    /// `None` for an empty track, which cannot be placed in time.
    pub fn summary(&self) -> Option<TrackSummary> {
        Some(TrackSummary {
            time_range: self.time_range()?,
            point_count: self.points.len(),
        })
    }

    /// Direction in whole degrees (0..360) of the vector from the last point
    /// back to the first, on normalized lat/long axes. Zero for empty or
    /// closed tracks.
    pub fn angle(&self) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        let norm_lat = (first.latitude - last.latitude) / 90.0;
        let norm_long = (first.longitude - last.longitude) / 180.0;
        let hypot = norm_lat.hypot(norm_long);
        if hypot == 0.0 {
            return 0.0;
        }
        let result = (norm_long / hypot).asin().to_degrees().trunc();
        if norm_lat >= 0.0 {
            (360.0 + result) % 360.0
        } else {
            180.0 - result
        }
    }

    /// Compare geometry at evenly spaced positions along both tracks.
    ///
    /// The tracks may have different point counts; the n-th sample is taken
    /// at the same fraction of each sequence. Two empty tracks match.
    pub fn route_matches(&self, other: &Track, tolerance_m: f64) -> bool {
        match (self.points.is_empty(), other.points.is_empty()) {
            (true, true) => return true,
            (true, false) | (false, true) => return false,
            (false, false) => {}
        }

        (0..=ROUTE_SAMPLES).all(|sample| {
            let a = self.sample(sample);
            let b = other.sample(sample);
            Haversine.distance(a.as_geo(), b.as_geo()) <= tolerance_m
        })
    }

    fn sample(&self, sample: usize) -> &Point {
        let last = self.points.len() - 1;
        &self.points[last * sample / ROUTE_SAMPLES]
    }
}

impl TryFrom<Vec<Point>> for Track {
    type Error = TrackError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

fn check_order(previous: Option<&Point>, points: &[Point], offset: usize) -> Result<(), TrackError> {
    let mut previous = previous.map(Point::time);
    for (index, point) in points.iter().enumerate() {
        if let Some(prev) = previous
            && point.time < prev
        {
            return Err(TrackError::OutOfOrder {
                index: offset + index,
                previous: prev,
                found: point.time,
            });
        }
        previous = Some(point.time);
    }
    Ok(())
}
