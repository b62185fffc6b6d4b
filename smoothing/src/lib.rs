//! Frame-stamped smoothing rings and input accumulators.
//!
//! A [`SmoothBuffer`] keeps the most recent samples together with the time
//! span each one covered, and answers "average over the last N seconds"
//! queries without allocating. Accumulators build on it to collect per-frame
//! input (mouse deltas, analog axes) and hand it out in tick-sized pieces.

#![forbid(unsafe_code)]

pub mod accumulators;

pub use accumulators::{FloatAccumulator, Vector2Accumulator};

use rapier3d::math::Vector;
use rapier3d::prelude::Real;

/// Value kinds a [`SmoothBuffer`] can average.
pub trait SmoothSample: Copy + Default {
    /// Returns `self + value * scale`.
    fn accumulate(self, value: Self, scale: f64) -> Self;

    /// Returns `self * scale`.
    fn scale(self, scale: f64) -> Self;
}

impl SmoothSample for Real {
    fn accumulate(self, value: Self, scale: f64) -> Self {
        self + (value as f64 * scale) as Real
    }

    fn scale(self, scale: f64) -> Self {
        (self as f64 * scale) as Real
    }
}

impl SmoothSample for [Real; 2] {
    fn accumulate(self, value: Self, scale: f64) -> Self {
        [
            self[0] + (value[0] as f64 * scale) as Real,
            self[1] + (value[1] as f64 * scale) as Real,
        ]
    }

    fn scale(self, scale: f64) -> Self {
        [
            (self[0] as f64 * scale) as Real,
            (self[1] as f64 * scale) as Real,
        ]
    }
}

impl SmoothSample for Vector<Real> {
    fn accumulate(self, value: Self, scale: f64) -> Self {
        self + value * scale as Real
    }

    fn scale(self, scale: f64) -> Self {
        self * scale as Real
    }
}

/// One recorded sample: the frame it arrived on, the time span it covers and
/// the value itself. A `size` of zero marks an unused slot.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmoothItem<T> {
    pub frame: u64,
    pub size: f64,
    pub value: T,
}

/// Fixed-capacity ring of frame-stamped samples.
///
/// Writes advance a cursor and overwrite the oldest slot; a second write on
/// the same frame updates the current slot in place. Reads walk backwards
/// from the cursor and blend samples until the requested window is covered.
pub struct SmoothBuffer<T: SmoothSample> {
    items: Vec<SmoothItem<T>>,
    index: usize,
}

/// Smoothing ring over scalar values.
pub type SmoothFloat = SmoothBuffer<Real>;

/// Smoothing ring over 2D values (input axes, look deltas).
pub type SmoothVector2 = SmoothBuffer<[Real; 2]>;

/// Smoothing ring over 3D values.
pub type SmoothVector3 = SmoothBuffer<Vector<Real>>;

impl<T: SmoothSample> SmoothBuffer<T> {
    /// Creates a ring holding up to `capacity` samples.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "smooth buffer capacity must be positive");

        Self {
            items: vec![SmoothItem::default(); capacity],
            index: 0,
        }
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.items.len()
    }

    /// Records `value` for `frame`, covering `size` seconds. Recording twice
    /// on the same frame replaces the earlier sample instead of consuming a
    /// new slot.
    ///
    /// # Panics
    /// Panics if `size` is not positive.
    pub fn add_value(&mut self, frame: u64, size: f64, value: T) {
        assert!(size > 0.0, "sample size must be positive");

        let current = &mut self.items[self.index];
        if current.size > 0.0 && current.frame == frame {
            current.size = size;
            current.value = value;
            return;
        }

        self.index = (self.index + 1) % self.items.len();

        self.items[self.index] = SmoothItem { frame, size, value };
    }

    /// Forgets all recorded samples.
    pub fn clear_values(&mut self) {
        for item in &mut self.items {
            *item = SmoothItem::default();
        }

        self.index = 0;
    }

    /// Averages the most recent samples over a trailing time `window` and
    /// rescales the result to represent a span of `size` seconds.
    ///
    /// A non-positive `window` returns the latest sample as-is. If the total
    /// recorded history is shorter than `window` the result is the default
    /// value; a partial ring never extrapolates.
    pub fn calculate_smooth_value(&self, window: f64, size: f64) -> T {
        let newest = &self.items[self.index];

        if window <= 0.0 {
            if newest.size <= 0.0 {
                return T::default();
            }
            return newest.value;
        }

        let mut accumulated = T::default();
        let mut remaining = window;

        // Walk backwards from the cursor, wrapping once around the ring.
        for offset in 0..self.items.len() {
            let slot = (self.index + self.items.len() - offset) % self.items.len();
            let item = &self.items[slot];

            if item.size <= 0.0 {
                continue;
            }

            if remaining <= item.size {
                accumulated = accumulated.accumulate(item.value, remaining / item.size);
                return accumulated.scale(size / window);
            }

            accumulated = accumulated.accumulate(item.value, 1.0);
            remaining -= item.size;
        }

        // The ring ran out before the window was covered.
        T::default()
    }

    fn items_mut(&mut self) -> &mut [SmoothItem<T>] {
        &mut self.items
    }
}

impl SmoothBuffer<Real> {
    /// Zeroes every recorded value matching the requested sign.
    pub fn filter_values(&mut self, positive: bool, negative: bool) {
        for item in self.items_mut() {
            if positive && item.value > 0.0 {
                item.value = 0.0;
            }
            if negative && item.value < 0.0 {
                item.value = 0.0;
            }
        }
    }
}

impl SmoothBuffer<[Real; 2]> {
    /// Zeroes recorded components matching the requested sign, per axis.
    pub fn filter_values(
        &mut self,
        positive_x: bool,
        negative_x: bool,
        positive_y: bool,
        negative_y: bool,
    ) {
        for item in self.items_mut() {
            if positive_x && item.value[0] > 0.0 {
                item.value[0] = 0.0;
            }
            if negative_x && item.value[0] < 0.0 {
                item.value[0] = 0.0;
            }
            if positive_y && item.value[1] > 0.0 {
                item.value[1] = 0.0;
            }
            if negative_y && item.value[1] < 0.0 {
                item.value[1] = 0.0;
            }
        }
    }
}

impl SmoothBuffer<Vector<Real>> {
    /// Zeroes recorded components matching the requested sign, per axis.
    #[allow(clippy::too_many_arguments)]
    pub fn filter_values(
        &mut self,
        positive_x: bool,
        negative_x: bool,
        positive_y: bool,
        negative_y: bool,
        positive_z: bool,
        negative_z: bool,
    ) {
        for item in self.items_mut() {
            if positive_x && item.value.x > 0.0 {
                item.value.x = 0.0;
            }
            if negative_x && item.value.x < 0.0 {
                item.value.x = 0.0;
            }
            if positive_y && item.value.y > 0.0 {
                item.value.y = 0.0;
            }
            if negative_y && item.value.y < 0.0 {
                item.value.y = 0.0;
            }
            if positive_z && item.value.z > 0.0 {
                item.value.z = 0.0;
            }
            if negative_z && item.value.z < 0.0 {
                item.value.z = 0.0;
            }
        }
    }
}
