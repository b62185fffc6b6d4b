//! Render-rate input accumulators with tick-aligned consumption.
//!
//! Input arrives once per render frame but is consumed by a fixed-rate
//! simulation. An accumulator sums incoming values (optionally smoothed over
//! a trailing window) and either hands the whole sum over at once or slices
//! it so each fixed tick receives exactly the portion of input that belongs
//! to its time span.

use rapier3d::prelude::Real;

use crate::{SmoothFloat, SmoothVector2};

const ACCUMULATOR_SAMPLES: usize = 256;

/// Accumulates scalar per-frame input (scroll, trigger axis).
pub struct FloatAccumulator {
    /// Trailing window in seconds used to smooth incoming values. Zero or
    /// negative disables smoothing.
    pub smoothing_window: Real,
    /// When smoothing, drop recorded history pointing the opposite way so a
    /// direction flip takes effect immediately.
    pub use_direction_filter: bool,

    smooth_values: SmoothFloat,
    accumulated_value: Real,
    unprocessed_value: Real,
    unprocessed_delta_time: Real,
    last_accumulate_frame: Option<u64>,
    last_consume_frame: Option<u64>,
}

impl FloatAccumulator {
    pub fn new(smoothing_window: Real, use_direction_filter: bool) -> Self {
        Self {
            smoothing_window,
            use_direction_filter,
            smooth_values: SmoothFloat::new(ACCUMULATOR_SAMPLES),
            accumulated_value: 0.0,
            unprocessed_value: 0.0,
            unprocessed_delta_time: 0.0,
            last_accumulate_frame: None,
            last_consume_frame: None,
        }
    }

    /// Total value accumulated and not yet consumed.
    pub fn accumulated_value(&self) -> Real {
        self.accumulated_value
    }

    /// Adds this frame's value. `delta_time` is the unscaled span the frame
    /// covered. A repeated call with the same `frame` is ignored.
    pub fn accumulate(&mut self, frame: u64, delta_time: Real, mut value: Real) {
        if self.last_accumulate_frame == Some(frame) {
            return;
        }

        if self.smoothing_window > 0.0 {
            // Clear recorded values in the opposite direction for an instant flip.
            if self.use_direction_filter {
                self.smooth_values.filter_values(value < 0.0, value > 0.0);
            }

            self.smooth_values
                .add_value(frame, delta_time as f64, value);

            value = self
                .smooth_values
                .calculate_smooth_value(self.smoothing_window as f64, delta_time as f64);
        }

        self.accumulated_value += value;

        self.unprocessed_value = value;
        self.unprocessed_delta_time = delta_time;
        self.last_accumulate_frame = Some(frame);
    }

    /// Returns everything accumulated so far and resets the pending state.
    pub fn consume(&mut self, frame: u64) -> Real {
        let consume_value = self.accumulated_value;

        self.accumulated_value = 0.0;
        self.unprocessed_value = 0.0;
        self.unprocessed_delta_time = 0.0;
        self.last_consume_frame = Some(frame);

        consume_value
    }

    /// Returns the portion of the accumulated value that belongs to the
    /// pending fixed tick.
    ///
    /// The first call within a frame consumes up to the tick boundary
    /// (`local_alpha` is the frame position between the previous and pending
    /// tick); repeated calls within the same frame consume further whole-tick
    /// slices of the remaining value.
    pub fn consume_tick_aligned(
        &mut self,
        frame: u64,
        local_alpha: Real,
        tick_delta_time: Real,
    ) -> Real {
        // Revert to the state before the latest accumulation; its value gets
        // re-added below proportionally to the covered time.
        let mut consume_value = self.accumulated_value - self.unprocessed_value;

        let base_alpha = if self.last_consume_frame != Some(frame) {
            local_alpha
        } else {
            0.0
        };

        let tick_aligned_delta_time = (1.0 - base_alpha) * tick_delta_time;

        let tick_aligned_value = if self.unprocessed_delta_time > 0.0 {
            let coverage = (tick_aligned_delta_time / self.unprocessed_delta_time).clamp(0.0, 1.0);
            self.unprocessed_value * coverage
        } else {
            0.0
        };

        consume_value += tick_aligned_value;

        self.unprocessed_value -= tick_aligned_value;
        self.unprocessed_delta_time -= tick_aligned_delta_time;

        self.accumulated_value -= consume_value;

        self.last_consume_frame = Some(frame);

        consume_value
    }

    /// Drops all accumulated and recorded state.
    pub fn clear(&mut self) {
        self.smooth_values.clear_values();

        self.accumulated_value = 0.0;
        self.unprocessed_value = 0.0;
        self.unprocessed_delta_time = 0.0;
    }
}

impl Default for FloatAccumulator {
    fn default() -> Self {
        Self::new(0.0, false)
    }
}

/// Accumulates 2D per-frame input (look delta, move axes).
pub struct Vector2Accumulator {
    /// Trailing window in seconds used to smooth incoming values. Zero or
    /// negative disables smoothing.
    pub smoothing_window: Real,
    /// When smoothing, drop recorded history pointing the opposite way so a
    /// direction flip takes effect immediately. Applied per component.
    pub use_direction_filter: bool,

    smooth_values: SmoothVector2,
    accumulated_value: [Real; 2],
    unprocessed_value: [Real; 2],
    unprocessed_delta_time: Real,
    last_accumulate_frame: Option<u64>,
    last_consume_frame: Option<u64>,
}

impl Vector2Accumulator {
    pub fn new(smoothing_window: Real, use_direction_filter: bool) -> Self {
        Self {
            smoothing_window,
            use_direction_filter,
            smooth_values: SmoothVector2::new(ACCUMULATOR_SAMPLES),
            accumulated_value: [0.0; 2],
            unprocessed_value: [0.0; 2],
            unprocessed_delta_time: 0.0,
            last_accumulate_frame: None,
            last_consume_frame: None,
        }
    }

    /// Total value accumulated and not yet consumed.
    pub fn accumulated_value(&self) -> [Real; 2] {
        self.accumulated_value
    }

    /// Adds this frame's value. `delta_time` is the unscaled span the frame
    /// covered. A repeated call with the same `frame` is ignored.
    pub fn accumulate(&mut self, frame: u64, delta_time: Real, mut value: [Real; 2]) {
        if self.last_accumulate_frame == Some(frame) {
            return;
        }

        if self.smoothing_window > 0.0 {
            // Clear recorded values in the opposite direction for an instant flip.
            if self.use_direction_filter {
                self.smooth_values.filter_values(
                    value[0] < 0.0,
                    value[0] > 0.0,
                    value[1] < 0.0,
                    value[1] > 0.0,
                );
            }

            self.smooth_values
                .add_value(frame, delta_time as f64, value);

            value = self
                .smooth_values
                .calculate_smooth_value(self.smoothing_window as f64, delta_time as f64);
        }

        self.accumulated_value[0] += value[0];
        self.accumulated_value[1] += value[1];

        self.unprocessed_value = value;
        self.unprocessed_delta_time = delta_time;
        self.last_accumulate_frame = Some(frame);
    }

    /// Returns everything accumulated so far and resets the pending state.
    pub fn consume(&mut self, frame: u64) -> [Real; 2] {
        let consume_value = self.accumulated_value;

        self.accumulated_value = [0.0; 2];
        self.unprocessed_value = [0.0; 2];
        self.unprocessed_delta_time = 0.0;
        self.last_consume_frame = Some(frame);

        consume_value
    }

    /// Returns the portion of the accumulated value that belongs to the
    /// pending fixed tick. See [`FloatAccumulator::consume_tick_aligned`].
    pub fn consume_tick_aligned(
        &mut self,
        frame: u64,
        local_alpha: Real,
        tick_delta_time: Real,
    ) -> [Real; 2] {
        let mut consume_value = [
            self.accumulated_value[0] - self.unprocessed_value[0],
            self.accumulated_value[1] - self.unprocessed_value[1],
        ];

        let base_alpha = if self.last_consume_frame != Some(frame) {
            local_alpha
        } else {
            0.0
        };

        let tick_aligned_delta_time = (1.0 - base_alpha) * tick_delta_time;

        let coverage = if self.unprocessed_delta_time > 0.0 {
            (tick_aligned_delta_time / self.unprocessed_delta_time).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let tick_aligned_value = [
            self.unprocessed_value[0] * coverage,
            self.unprocessed_value[1] * coverage,
        ];

        consume_value[0] += tick_aligned_value[0];
        consume_value[1] += tick_aligned_value[1];

        self.unprocessed_value[0] -= tick_aligned_value[0];
        self.unprocessed_value[1] -= tick_aligned_value[1];
        self.unprocessed_delta_time -= tick_aligned_delta_time;

        self.accumulated_value[0] -= consume_value[0];
        self.accumulated_value[1] -= consume_value[1];

        self.last_consume_frame = Some(frame);

        consume_value
    }

    /// Drops all accumulated and recorded state.
    pub fn clear(&mut self) {
        self.smooth_values.clear_values();

        self.accumulated_value = [0.0; 2];
        self.unprocessed_value = [0.0; 2];
        self.unprocessed_delta_time = 0.0;
    }
}

impl Default for Vector2Accumulator {
    fn default() -> Self {
        Self::new(0.0, false)
    }
}
