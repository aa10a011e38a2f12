use serde::{Deserialize, Serialize};

/// Kind of time series tracked per experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    /// (coordinator elapsed seconds, loss)
    Loss,
    /// (elapsed seconds, model updates per second)
    UpdatesPerSecond,
    /// (coordinator elapsed seconds, dollars per second)
    CostPerSecond,
    /// (dollars spent so far, loss)
    LossVsCost,
    /// (coordinator elapsed seconds, loss divided by dollars spent so far)
    LossPerDollar,
    /// (elapsed seconds, connected workers)
    Workers,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Loss,
        MetricKind::UpdatesPerSecond,
        MetricKind::CostPerSecond,
        MetricKind::LossVsCost,
        MetricKind::LossPerDollar,
        MetricKind::Workers,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub x: f64,
    pub y: f64,
}

/// Append-only series of points with non-decreasing `x`.
///
/// A point equal to the last recorded one is dropped so repeated polls of an
/// unchanged coordinator do not inflate the series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSeries {
    points: Vec<MetricPoint>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `(x, y)` and reports whether the point was kept.
    pub fn push(&mut self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        if let Some(last) = self.points.last()
            && (x < last.x || (x == last.x && y == last.y))
        {
            return false;
        }
        self.points.push(MetricPoint { x, y });
        true
    }

    pub fn last(&self) -> Option<MetricPoint> {
        self.points.last().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn as_slice(&self) -> &[MetricPoint] {
        &self.points
    }
}
