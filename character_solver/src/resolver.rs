//! Combines unrelated depenetration vectors into one correction.
//!
//! The starting point is the sum of the componentwise minimum and maximum of
//! the input corrections, which lands close to the right answer and keeps
//! iteration counts low. Gradient descent over the summed absolute errors
//! then refines it. The approach behaves well on corrections with varied
//! normals but cannot separate corrections that share a direction and differ
//! only in distance; run at least two penetration passes and apply the full
//! correction only in the last one.

use collision_cache::CACHE_SIZE;
use mover_math::VectorExt;
use rapier3d::math::Vector;
use rapier3d::prelude::Real;

#[derive(Clone, Copy)]
struct Correction {
    amount: Vector<Real>,
    direction: Vector<Real>,
    distance: Real,
    error: Real,
}

impl Correction {
    fn empty() -> Self {
        Self {
            amount: Vector::zeros(),
            direction: Vector::zeros(),
            distance: 0.0,
            error: 0.0,
        }
    }
}

/// Fixed-capacity accumulator of contact corrections and the solvers that
/// collapse them into a single target correction.
pub struct CorrectionResolver {
    corrections: Vec<Correction>,
    size: usize,
    iterations: usize,
    min_correction: Vector<Real>,
    max_correction: Vector<Real>,
    target_correction: Vector<Real>,
}

impl CorrectionResolver {
    pub fn new(max_size: usize) -> Self {
        Self {
            corrections: vec![Correction::empty(); max_size],
            size: 0,
            iterations: 0,
            min_correction: Vector::zeros(),
            max_correction: Vector::zeros(),
            target_correction: Vector::zeros(),
        }
    }

    /// Count of input corrections.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of iterations in the last calculation.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Correction calculated from the input corrections.
    pub fn target_correction(&self) -> Vector<Real> {
        self.target_correction
    }

    /// Direction of the correction at `index`.
    pub fn direction(&self, index: usize) -> Vector<Real> {
        self.corrections[index].direction
    }

    /// Clears all accumulated corrections. Call before adding a new set.
    pub fn reset(&mut self) {
        self.size = 0;
        self.iterations = 0;
        self.min_correction = Vector::zeros();
        self.max_correction = Vector::zeros();
        self.target_correction = Vector::zeros();
    }

    /// Adds a single correction vector.
    pub fn add_correction(&mut self, direction: Vector<Real>, distance: Real) {
        let correction = &mut self.corrections[self.size];

        correction.amount = direction * distance;
        correction.direction = direction;
        correction.distance = distance;

        self.min_correction = self.min_correction.inf(&correction.amount);
        self.max_correction = self.max_correction.sup(&correction.amount);

        self.size += 1;
    }

    /// Sum of the componentwise minimum and maximum of all corrections.
    pub fn calculate_min_max(&mut self) -> Vector<Real> {
        self.iterations = 0;
        self.target_correction = self.min_correction + self.max_correction;

        self.target_correction
    }

    /// Plain sum of all corrections.
    pub fn calculate_sum(&mut self) -> Vector<Real> {
        self.iterations = 0;
        self.target_correction = Vector::zeros();

        for correction in &self.corrections[..self.size] {
            self.target_correction += correction.amount;
        }

        self.target_correction
    }

    /// Exact solve of two corrections: the result satisfies both contact
    /// constraints unless the directions are near parallel, in which case it
    /// falls back to the min-max estimate.
    ///
    /// # Panics
    /// Panics unless exactly two corrections were added.
    pub fn calculate_binary(&mut self) -> Vector<Real> {
        assert_eq!(self.size, 2, "binary resolve needs exactly two corrections");

        self.iterations = 0;
        self.target_correction = self.min_correction + self.max_correction;

        let correction0 = self.corrections[0];
        let correction1 = self.corrections[1];

        let correction_dot = correction0.direction.dot(&correction1.direction);
        if correction_dot > 0.999 || correction_dot < -0.999 {
            return self.target_correction;
        }

        let delta_direction = correction0
            .direction
            .cross(&correction1.direction)
            .cross(&correction0.direction)
            .try_normalize(1.0e-5)
            .unwrap_or_else(Vector::zeros);
        let delta_distance = (correction1.distance - correction0.distance * correction_dot)
            / (1.0 - correction_dot * correction_dot).sqrt();

        self.target_correction = correction0.amount + delta_direction * delta_distance;

        self.target_correction
    }

    /// Iterative solve over any number of corrections, minimizing the summed
    /// absolute constraint errors starting from the min-max estimate.
    pub fn calculate_gradient_descent(
        &mut self,
        max_iterations: usize,
        max_error: Real,
    ) -> Vector<Real> {
        self.iterations = 0;
        self.target_correction = self.min_correction + self.max_correction;

        if self.size <= 1 {
            return self.target_correction;
        }

        let mut desired_correction = self.target_correction;

        while self.iterations < max_iterations {
            let mut error = Vector::zeros();
            let mut error_correction = 0.0;
            let mut error_correction_size = 0.0;

            for correction in &mut self.corrections[..self.size] {
                // Constraint error of the desired correction against this
                // contact alone.
                correction.error = correction.direction.dot(&desired_correction)
                    - correction.distance;

                error += correction.direction * correction.error;
            }

            // A near-zero accumulated error is a local minimum.
            if error.is_almost_zero(max_error) {
                break;
            }

            error = error.try_normalize(1.0e-5).unwrap_or_else(Vector::zeros);

            for correction in &self.corrections[..self.size] {
                let error_dot = correction.direction.dot(&error);

                // Corrections aligned with the accumulated error weigh more.
                error_correction += correction.error * error_dot;
                error_correction_size += error_dot.abs();
            }

            if error_correction_size < 0.000001 {
                break;
            }

            error_correction /= error_correction_size;
            if error_correction.abs() < max_error {
                break;
            }

            desired_correction -= error * error_correction;

            self.iterations += 1;
        }

        self.target_correction = desired_correction;

        desired_correction
    }
}

impl Default for CorrectionResolver {
    fn default() -> Self {
        Self::new(CACHE_SIZE)
    }
}
