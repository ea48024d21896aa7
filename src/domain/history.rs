//! Quaternion chart history
//!
//! Keeps the newest points of the four quaternion series for the
//! strip-chart. Each series starts with a single `(0, 0)` point so an empty
//! chart still has something to draw, and the x axis is a running sample
//! counter.

use crate::domain::models::OrientationSample;
use std::collections::VecDeque;

/// Vertical bounds of the chart. Points outside are clamped onto them.
pub const Y_AXIS_BOUNDS: (f64, f64) = (-1.0, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    W,
    X,
    Y,
    Z,
}

impl Component {
    pub const ALL: [Component; 4] = [Component::W, Component::X, Component::Y, Component::Z];

    fn index(&self) -> usize {
        match self {
            Self::W => 0,
            Self::X => 1,
            Self::Y => 2,
            Self::Z => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuaternionHistory {
    series: [VecDeque<(f64, f64)>; 4],
    capacity: usize,
    last_x: f64,
}

impl QuaternionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut history = Self {
            series: Default::default(),
            capacity,
            last_x: 1.0,
        };
        history.seed();
        history
    }

    fn seed(&mut self) {
        for series in self.series.iter_mut() {
            series.clear();
            series.push_back((0.0, 0.0));
        }
        self.last_x = 1.0;
    }

    /// Append one sample to all four series, scrolling out the oldest points.
    pub fn push(&mut self, sample: &OrientationSample) {
        self.last_x += 1.0;
        for (series, value) in self.series.iter_mut().zip(sample.components()) {
            let (low, high) = Y_AXIS_BOUNDS;
            series.push_back((self.last_x, (value as f64).clamp(low, high)));
            while series.len() > self.capacity {
                series.pop_front();
            }
        }
    }

    pub fn series(&self, component: Component) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.series[component.index()].iter().copied()
    }

    pub fn latest(&self, component: Component) -> Option<(f64, f64)> {
        self.series[component.index()].back().copied()
    }

    /// Number of points per series
    pub fn len(&self) -> usize {
        self.series[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.series[0].is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Visible x range `(first, last)` of the scrolling viewport
    pub fn viewport(&self) -> (f64, f64) {
        let first = self.series[0].front().map(|p| p.0).unwrap_or(0.0);
        let last = self.series[0].back().map(|p| p.0).unwrap_or(0.0);
        (first, last)
    }

    pub fn clear(&mut self) {
        self.seed();
    }
}
