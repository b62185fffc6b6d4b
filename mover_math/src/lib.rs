//! Shared math for the character mover: ground projection, penetration
//! redirection, the acceleration/friction model and look-angle helpers.
//!
//! Angles are degrees unless a name says otherwise. Yaw grows clockwise when
//! viewed from above; yaw 0 faces -Z.
#![forbid(unsafe_code)]

use rapier3d::math::{Rotation, Vector};
use rapier3d::prelude::Real;

/// Norm below which a direction is treated as degenerate.
const DIRECTION_EPSILON: Real = 1.0e-6;

pub trait VectorExt {
    /// Copy with the Y component zeroed.
    fn only_xz(&self) -> Self;
    fn is_zero(&self) -> bool;
    /// Component-wise comparison against the tolerance.
    fn is_almost_zero(&self, tolerance: Real) -> bool;
}

impl VectorExt for Vector<Real> {
    fn only_xz(&self) -> Self {
        Vector::new(self.x, 0.0, self.z)
    }

    fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    fn is_almost_zero(&self, tolerance: Real) -> bool {
        self.x.abs() < tolerance && self.y.abs() < tolerance && self.z.abs() < tolerance
    }
}

/// Linear interpolation with alpha clamped to [0, 1].
pub fn lerp(from: Real, to: Real, alpha: Real) -> Real {
    from + (to - from) * alpha.clamp(0.0, 1.0)
}

/// Component-wise [`lerp`].
pub fn lerp_vector(from: Vector<Real>, to: Vector<Real>, alpha: Real) -> Vector<Real> {
    from + (to - from) * alpha.clamp(0.0, 1.0)
}

/// Recomputes the Y component of `vector` so the result lies in the plane
/// with the given normal, keeping XZ intact. Fails for near-vertical planes
/// where no finite Y exists.
pub fn project_on_ground(ground_normal: Vector<Real>, vector: Vector<Real>) -> Option<Vector<Real>> {
    let up_dot = Vector::y().dot(&ground_normal);
    if up_dot.abs() < 0.001 {
        return None;
    }
    let plane_dot = -vector.dot(&ground_normal);
    Some(Vector::new(vector.x, vector.y + plane_dot / up_dot, vector.z))
}

/// Redirects a mostly-vertical correction into the XZ plane, lengthening it
/// so the resolved position still clears the surface. No-op when the
/// correction has no horizontal part.
pub fn project_vertical_penetration(direction: &mut Vector<Real>, distance: &mut Real) {
    let correction = *direction * *distance;
    let correction_xz = correction.only_xz();
    let distance_xz = correction_xz.norm();

    if distance_xz >= DIRECTION_EPSILON {
        let reflected_distance_xz = correction.y * correction.y / distance_xz;

        *direction = correction_xz / distance_xz;
        *distance = distance_xz + reflected_distance_xz;
    }
}

/// Redirects a mostly-horizontal correction into pure up (or down), scaled
/// so the resolved position still clears the surface. Collapses to zero when
/// the correction has no vertical part.
pub fn project_horizontal_penetration(direction: &mut Vector<Real>, distance: &mut Real) {
    let correction = *direction * *distance;

    *direction = Vector::y();
    *distance = 0.0;

    if correction.y > -DIRECTION_EPSILON && correction.y < DIRECTION_EPSILON {
        return;
    }

    *distance =
        correction.y + (correction.x * correction.x + correction.z * correction.z) / correction.y;

    if *distance < 0.0 {
        *direction = -*direction;
        *distance = -*distance;
    }
}

/// Speed gain along `direction` (masked by `axis`) from a constant term, a
/// term relative to `max_speed` and a term proportional to the speed still
/// missing up to `max_speed`. `input_acceleration` scales all three.
#[allow(clippy::too_many_arguments)]
pub fn get_acceleration(
    velocity: Vector<Real>,
    direction: Vector<Real>,
    axis: Vector<Real>,
    max_speed: Real,
    clamp_speed: bool,
    input_acceleration: Real,
    constant_acceleration: Real,
    relative_acceleration: Real,
    proportional_acceleration: Real,
    delta_time: Real,
) -> Vector<Real> {
    if input_acceleration <= 0.0 {
        return Vector::zeros();
    }
    if constant_acceleration <= 0.0 && relative_acceleration <= 0.0 && proportional_acceleration <= 0.0
    {
        return Vector::zeros();
    }
    if direction.is_zero() {
        return Vector::zeros();
    }

    let base_speed = velocity.component_mul(&axis).norm();
    let base_direction = match direction.component_mul(&axis).try_normalize(DIRECTION_EPSILON) {
        Some(normalized) => normalized,
        None => return Vector::zeros(),
    };

    let missing_speed = (max_speed - base_speed).max(0.0);

    let constant_acceleration = constant_acceleration.max(0.0) * input_acceleration;
    let relative_acceleration = relative_acceleration.max(0.0) * input_acceleration;
    let proportional_acceleration = proportional_acceleration.max(0.0) * input_acceleration;

    let mut speed_gain = (constant_acceleration
        + max_speed * relative_acceleration
        + missing_speed * proportional_acceleration)
        * delta_time;
    if speed_gain <= 0.0 {
        return Vector::zeros();
    }
    if clamp_speed && speed_gain > missing_speed {
        speed_gain = missing_speed;
    }

    base_direction * speed_gain
}

/// Speed drop opposing `direction` (masked by `axis`) from a constant term,
/// a term relative to `max_speed` and a term proportional to current speed.
#[allow(clippy::too_many_arguments)]
pub fn get_friction(
    velocity: Vector<Real>,
    direction: Vector<Real>,
    axis: Vector<Real>,
    max_speed: Real,
    clamp_speed: bool,
    constant_friction: Real,
    relative_friction: Real,
    proportional_friction: Real,
    delta_time: Real,
) -> Vector<Real> {
    if constant_friction <= 0.0 && relative_friction <= 0.0 && proportional_friction <= 0.0 {
        return Vector::zeros();
    }
    if direction.is_zero() {
        return Vector::zeros();
    }

    let base_speed = velocity.component_mul(&axis).norm();
    let base_direction = match direction.component_mul(&axis).try_normalize(DIRECTION_EPSILON) {
        Some(normalized) => normalized,
        None => return Vector::zeros(),
    };

    let mut speed_drop = (constant_friction.max(0.0)
        + max_speed * relative_friction.max(0.0)
        + base_speed * proportional_friction.max(0.0))
        * delta_time;
    if speed_drop <= 0.0 {
        return Vector::zeros();
    }
    if clamp_speed && speed_drop > base_speed {
        speed_drop = base_speed;
    }

    -base_direction * speed_drop
}

/// [`get_friction`] weakened as `direction` aligns with the ground normal,
/// so steep surfaces keep characters sliding.
#[allow(clippy::too_many_arguments)]
pub fn get_ground_friction(
    velocity: Vector<Real>,
    direction: Vector<Real>,
    axis: Vector<Real>,
    ground_normal: Vector<Real>,
    max_speed: Real,
    clamp_speed: bool,
    constant_friction: Real,
    relative_friction: Real,
    proportional_friction: Real,
    delta_time: Real,
) -> Vector<Real> {
    let alignment = match direction.try_normalize(DIRECTION_EPSILON) {
        Some(normalized) => normalized.dot(&ground_normal).clamp(0.0, 1.0),
        None => 0.0,
    };
    let multiplier = 1.0 - alignment;

    get_friction(
        velocity,
        direction,
        axis,
        max_speed,
        clamp_speed,
        constant_friction * multiplier,
        relative_friction * multiplier,
        proportional_friction * multiplier,
        delta_time,
    )
}

/// Per-axis combination: acceleration wins when at least as strong as
/// friction, otherwise friction may only decay velocity toward zero, never
/// push it across.
pub fn combine_acceleration_and_friction(
    velocity: Vector<Real>,
    acceleration: Vector<Real>,
    friction: Vector<Real>,
) -> Vector<Real> {
    Vector::new(
        combine_axis(velocity.x, acceleration.x, friction.x),
        combine_axis(velocity.y, acceleration.y, friction.y),
        combine_axis(velocity.z, acceleration.z, friction.z),
    )
}

fn combine_axis(velocity: Real, acceleration: Real, friction: Real) -> Real {
    let delta = acceleration + friction;

    if acceleration.abs() >= friction.abs() {
        velocity + delta
    } else if velocity > 0.0 {
        (velocity + delta).max(0.0)
    } else if velocity < 0.0 {
        (velocity + delta).min(0.0)
    } else {
        velocity
    }
}

/// Wraps yaw into [-180, 180].
pub fn wrap_yaw(mut yaw: Real) -> Real {
    while yaw > 180.0 {
        yaw -= 360.0;
    }
    while yaw < -180.0 {
        yaw += 360.0;
    }
    yaw
}

/// Clamps pitch to [-90, 90] and wraps yaw to [-180, 180].
pub fn clamp_look_angles(pitch: Real, yaw: Real) -> (Real, Real) {
    (pitch.clamp(-90.0, 90.0), wrap_yaw(yaw))
}

/// [`clamp_look_angles`] with a custom pitch range, itself clamped to
/// [-90, 90].
pub fn clamp_look_angles_range(
    pitch: Real,
    yaw: Real,
    min_pitch: Real,
    max_pitch: Real,
) -> (Real, Real) {
    let min_pitch = min_pitch.max(-90.0);
    let max_pitch = max_pitch.min(90.0).max(min_pitch);

    (pitch.clamp(min_pitch, max_pitch), wrap_yaw(yaw))
}

/// Horizontal facing for the given yaw.
pub fn yaw_direction(yaw_degrees: Real) -> Vector<Real> {
    let yaw = yaw_degrees.to_radians();
    Vector::new(yaw.sin(), 0.0, -yaw.cos())
}

/// Facing for the given pitch and yaw. Positive pitch looks down.
pub fn look_direction(pitch_degrees: Real, yaw_degrees: Real) -> Vector<Real> {
    let pitch = pitch_degrees.to_radians();
    let yaw = yaw_degrees.to_radians();
    Vector::new(
        pitch.cos() * yaw.sin(),
        -pitch.sin(),
        -(pitch.cos() * yaw.cos()),
    )
}

/// Rotation that maps -Z onto [`yaw_direction`].
pub fn yaw_rotation(yaw_degrees: Real) -> Rotation<Real> {
    Rotation::from_axis_angle(&Vector::y_axis(), -yaw_degrees.to_radians())
}

/// Rotation that maps -Z onto [`look_direction`].
pub fn look_rotation(pitch_degrees: Real, yaw_degrees: Real) -> Rotation<Real> {
    yaw_rotation(yaw_degrees) * Rotation::from_axis_angle(&Vector::x_axis(), -pitch_degrees.to_radians())
}

/// Interpolates between two values over a circular range, taking the shorter
/// way around. Both endpoints are clamped into [min, max] first.
///
/// Panics when `max <= min`.
pub fn interpolate_range(from: Real, to: Real, min: Real, max: Real, alpha: Real) -> Real {
    let range = max - min;
    assert!(range > 0.0, "interpolate_range requires max > min");

    let from = from.clamp(min, max);
    let to = to.clamp(min, max);

    if from == to {
        return from;
    }

    let half_range = range * 0.5;

    if from < to {
        let distance = to - from;
        if distance <= half_range {
            lerp(from, to, alpha)
        } else {
            let mut interpolated = lerp(from + range, to, alpha);
            if interpolated > max {
                interpolated -= range;
            }
            interpolated
        }
    } else {
        let distance = from - to;
        if distance <= half_range {
            lerp(from, to, alpha)
        } else {
            let mut interpolated = lerp(from - range, to, alpha);
            if interpolated <= min {
                interpolated += range;
            }
            interpolated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(actual: Real, expected: Real, tolerance: Real) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} within {} of {}",
            actual,
            tolerance,
            expected
        );
    }

    #[test]
    fn ground_projection_stays_in_plane() {
        let normal = Vector::new(0.0, 0.8, 0.6).normalize();
        let vector = Vector::new(1.0, 0.0, 2.0);

        let projected = project_on_ground(normal, vector).expect("walkable plane");

        assert_near(projected.dot(&normal), 0.0, 1.0e-6);
        assert_near(projected.x, vector.x, 1.0e-6);
        assert_near(projected.z, vector.z, 1.0e-6);
    }

    #[test]
    fn ground_projection_rejects_vertical_plane() {
        let normal = Vector::new(1.0, 0.0, 0.0);
        assert!(project_on_ground(normal, Vector::new(0.0, 1.0, 0.0)).is_none());
    }

    #[test]
    fn vertical_penetration_redirects_into_xz() {
        let mut direction = Vector::new(0.6, 0.8, 0.0);
        let mut distance = 1.0;

        project_vertical_penetration(&mut direction, &mut distance);

        assert_near(direction.x, 1.0, 1.0e-6);
        assert_near(direction.y, 0.0, 1.0e-6);
        assert_near(distance, 0.6 + 0.64 / 0.6, 1.0e-5);
    }

    #[test]
    fn horizontal_penetration_collapses_flat_corrections() {
        let mut direction = Vector::new(1.0, 0.0, 0.0);
        let mut distance = 0.5;

        project_horizontal_penetration(&mut direction, &mut distance);

        assert_near(direction.y, 1.0, 1.0e-6);
        assert_near(distance, 0.0, 1.0e-6);
    }

    #[test]
    fn horizontal_penetration_points_up() {
        let mut direction = Vector::new(0.8, 0.6, 0.0);
        let mut distance = 1.0;

        project_horizontal_penetration(&mut direction, &mut distance);

        assert_near(direction.y, 1.0, 1.0e-6);
        assert_near(distance, 0.6 + 0.64 / 0.6, 1.0e-5);
    }

    #[test]
    fn acceleration_clamps_to_missing_speed() {
        let gain = get_acceleration(
            Vector::new(7.9, 0.0, 0.0),
            Vector::new(1.0, 0.0, 0.0),
            Vector::new(1.0, 1.0, 1.0),
            8.0,
            true,
            1.0,
            1000.0,
            0.0,
            0.0,
            1.0 / 60.0,
        );

        assert_near(gain.norm(), 0.1, 1.0e-5);
    }

    #[test]
    fn friction_never_reverses_velocity() {
        let velocity = Vector::new(0.5, 0.0, 0.0);
        let friction = get_friction(
            velocity,
            velocity,
            Vector::new(1.0, 0.0, 1.0),
            8.0,
            true,
            100.0,
            0.0,
            0.0,
            1.0 / 60.0,
        );

        assert_near(friction.x, -0.5, 1.0e-5);
    }

    #[test]
    fn combine_lets_stronger_acceleration_win() {
        let combined = combine_acceleration_and_friction(
            Vector::new(1.0, 0.0, 0.0),
            Vector::new(0.4, 0.0, 0.0),
            Vector::new(-0.3, 0.0, 0.0),
        );
        assert_near(combined.x, 1.1, 1.0e-6);
    }

    #[test]
    fn combine_stops_at_zero_under_pure_friction() {
        let combined = combine_acceleration_and_friction(
            Vector::new(0.2, 0.0, 0.0),
            Vector::zeros(),
            Vector::new(-0.5, 0.0, 0.0),
        );
        assert_near(combined.x, 0.0, 1.0e-6);
    }

    #[test]
    fn yaw_wraps_into_range() {
        assert_near(wrap_yaw(270.0), -90.0, 1.0e-6);
        assert_near(wrap_yaw(-270.0), 90.0, 1.0e-6);
        assert_near(wrap_yaw(720.0 + 10.0), 10.0, 1.0e-4);
    }

    #[test]
    fn look_angles_clamp_pitch() {
        let (pitch, yaw) = clamp_look_angles(120.0, 190.0);
        assert_near(pitch, 90.0, 1.0e-6);
        assert_near(yaw, -170.0, 1.0e-6);
    }

    #[test]
    fn interpolate_range_takes_short_way_around() {
        let value = interpolate_range(170.0, -170.0, -180.0, 180.0, 0.5);
        assert_near(value, 180.0, 1.0e-4);
    }

    #[test]
    fn interpolate_range_plain_midpoint() {
        let value = interpolate_range(-10.0, 30.0, -180.0, 180.0, 0.5);
        assert_near(value, 10.0, 1.0e-5);
    }

    #[test]
    #[should_panic]
    fn interpolate_range_rejects_empty_range() {
        interpolate_range(0.0, 1.0, 5.0, 5.0, 0.5);
    }

    #[test]
    fn yaw_direction_matches_rotation() {
        for yaw in [0.0, 45.0, 90.0, 180.0, -135.0] {
            let direct = yaw_direction(yaw);
            let rotated = yaw_rotation(yaw) * Vector::new(0.0, 0.0, -1.0);
            assert_near((direct - rotated).norm(), 0.0, 1.0e-5);
        }
    }

    #[test]
    fn look_direction_pitches_down() {
        let direction = look_direction(90.0, 0.0);
        assert_near(direction.y, -1.0, 1.0e-6);
    }
}
