//! Baseline movement: gravity, input-driven acceleration and friction.

use character_solver::{MoverProcessor, ProcessorGroup, StageContext};
use mover_math::{
    combine_acceleration_and_friction, get_acceleration, get_friction, get_ground_friction,
    project_on_ground, VectorExt,
};
use mover_state::MoverState;
use rapier3d::math::Vector;
use rapier3d::prelude::Real;

/// Tolerance below which velocities and directions count as zero.
const ALMOST_ZERO: Real = 0.001;
const DIRECTION_ALMOST_ZERO: Real = 0.0001;

/// Turns input direction, gravity and external forces into the kinematic and
/// dynamic velocity pair consumed by the move loop.
///
/// Every value is recomputed from the state of the previous fixed tick, never
/// integrated across partial frames, so prediction and re-simulation agree
/// bit for bit. In `PrepareData` the processor owns gravity, the walkable
/// angle and both velocities; in `AfterMoveStep` it fixes the velocities up
/// after landing and ceiling contacts. Both stages suppress every other
/// Environment processor, so exactly one environment wins per move.
pub struct EnvironmentProcessor {
    /// Maximum speed reachable from input alone, in meters per second.
    pub kinematic_speed: Real,
    /// Scale applied to queued jump impulses. Zero disables jumping.
    pub jump_multiplier: Real,
    pub gravity: Vector<Real>,
    /// Offset added to [`Self::PRIORITY`]; environments meant to override the
    /// default one use a positive value.
    pub relative_priority: i32,
    /// Maximum walkable surface angle, in degrees.
    pub max_ground_angle: Real,
    /// Dynamic velocity decay per second of its own speed while grounded.
    pub dynamic_ground_friction: Real,
    /// Kinematic speed gain per second, relative to `kinematic_speed`, while
    /// grounded.
    pub kinematic_ground_acceleration: Real,
    /// Kinematic velocity decay per second of its own speed while grounded.
    pub kinematic_ground_friction: Real,
    pub dynamic_air_friction: Real,
    pub kinematic_air_acceleration: Real,
    pub kinematic_air_friction: Real,
}

impl EnvironmentProcessor {
    pub const PRIORITY: i32 = 1000;
}

impl Default for EnvironmentProcessor {
    fn default() -> Self {
        Self {
            kinematic_speed: 8.0,
            jump_multiplier: 1.0,
            gravity: Vector::new(0.0, -9.81, 0.0),
            relative_priority: 0,
            max_ground_angle: 60.0,
            dynamic_ground_friction: 20.0,
            kinematic_ground_acceleration: 50.0,
            kinematic_ground_friction: 35.0,
            dynamic_air_friction: 2.0,
            kinematic_air_acceleration: 5.0,
            kinematic_air_friction: 2.0,
        }
    }
}

impl MoverProcessor for EnvironmentProcessor {
    fn name(&self) -> &'static str {
        "Environment"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY + self.relative_priority
    }

    fn group(&self) -> ProcessorGroup {
        ProcessorGroup::Environment
    }

    fn prepare_data(&mut self, ctx: &mut StageContext<'_>) {
        ctx.state.gravity = self.gravity;
        ctx.state.max_ground_angle = self.max_ground_angle;

        self.set_dynamic_velocity(ctx);
        self.set_kinematic_direction(ctx.state);
        self.set_kinematic_tangent(ctx.state);
        self.set_kinematic_speed(ctx.state);
        self.set_kinematic_velocity(ctx.state);

        ctx.suppress_group(ProcessorGroup::Environment);
    }

    fn after_move_step(&mut self, ctx: &mut StageContext<'_>) {
        // Runs once per CCD sub-step.
        let state = &mut *ctx.state;

        if state.is_grounded {
            if state.was_grounded
                && !state.is_snapping_to_ground
                && state.dynamic_velocity.y < 0.0
                && state.dynamic_velocity.only_xz().is_almost_zero(ALMOST_ZERO)
            {
                // Grounded: stop accumulating gravity and clamp to exact zero.
                state.dynamic_velocity.y = 0.0;
            }

            if !state.was_grounded {
                if state.kinematic_velocity.only_xz().is_almost_zero(ALMOST_ZERO) {
                    // Landed without horizontal movement.
                    state.kinematic_velocity.y = 0.0;
                } else if let Some(projected) =
                    project_on_ground(state.ground_normal, state.kinematic_velocity)
                {
                    if let Some(normalized) = projected.try_normalize(1.0e-6) {
                        state.kinematic_velocity = normalized * state.kinematic_velocity.norm();
                    }
                }
            }
        } else if !state.was_grounded && state.dynamic_velocity.y > 0.0 && state.delta_time > 0.0 {
            let step_velocity = (state.target_position - state.base_position) / state.delta_time;
            if step_velocity.y.abs() < ALMOST_ZERO {
                // Moving up without gaining height: hitting a ceiling.
                state.dynamic_velocity.y = 0.0;
            }
        }

        ctx.suppress_group(ProcessorGroup::Environment);
    }
}

impl EnvironmentProcessor {
    fn set_dynamic_velocity(&self, ctx: &mut StageContext<'_>) {
        let mass = ctx.settings.mass;
        let state = &mut *ctx.state;
        let delta_time = state.update_delta_time;
        let mut dynamic_velocity = state.dynamic_velocity;

        if !state.is_grounded
            || (!state.is_stepping_up
                && (state.is_snapping_to_ground || state.ground_distance > ALMOST_ZERO))
        {
            // Gravity applies in the air; snapping and hovering within the
            // extent count as air, stepping up does not.
            dynamic_velocity += state.gravity * delta_time;
        }

        if !state.jump_impulse.is_zero() && self.jump_multiplier > 0.0 {
            if let Some(jump_direction) = state.jump_impulse.try_normalize(1.0e-6) {
                // Eliminate existing velocity along the jump direction so the
                // jump height does not depend on the previous motion.
                dynamic_velocity -= dynamic_velocity.component_mul(&jump_direction);
                dynamic_velocity += state.jump_impulse * self.jump_multiplier / mass;

                state.jump_frames += 1;
            }
        }

        dynamic_velocity += state.external_velocity;
        dynamic_velocity += state.external_acceleration * delta_time;
        dynamic_velocity += state.external_impulse / mass;
        dynamic_velocity += state.external_force * (delta_time / mass);

        if !dynamic_velocity.is_zero() {
            if dynamic_velocity.is_almost_zero(ALMOST_ZERO) {
                dynamic_velocity = Vector::zeros();
            } else if state.is_grounded {
                let mut friction_axis = Vector::new(1.0, 1.0, 1.0);
                if state.ground_distance > ALMOST_ZERO || state.is_snapping_to_ground {
                    friction_axis.y = 0.0;
                }

                dynamic_velocity += get_ground_friction(
                    dynamic_velocity,
                    dynamic_velocity,
                    friction_axis,
                    state.ground_normal,
                    state.kinematic_speed,
                    true,
                    0.0,
                    0.0,
                    self.dynamic_ground_friction,
                    delta_time,
                );
            } else {
                dynamic_velocity += get_friction(
                    dynamic_velocity,
                    dynamic_velocity,
                    Vector::new(1.0, 0.0, 1.0),
                    state.kinematic_speed,
                    true,
                    0.0,
                    0.0,
                    self.dynamic_air_friction,
                    delta_time,
                );
            }
        }

        state.dynamic_velocity = dynamic_velocity;

        // Stages only run on the fixed timeframe, so one-shot inputs are
        // consumed here; per-tick forces are consumed unconditionally.
        state.jump_impulse = Vector::zeros();
        state.external_velocity = Vector::zeros();
        state.external_impulse = Vector::zeros();
        state.external_acceleration = Vector::zeros();
        state.external_force = Vector::zeros();
    }

    fn set_kinematic_direction(&self, state: &mut MoverState) {
        // The direction we want to move: input with the Y axis filtered out.
        state.kinematic_direction = state.input_direction.only_xz();
    }

    fn set_kinematic_tangent(&self, state: &mut MoverState) {
        // The direction we will move with.
        if state.is_grounded {
            if !state.kinematic_direction.is_almost_zero(DIRECTION_ALMOST_ZERO) {
                if let Some(projected) =
                    project_on_ground(state.ground_normal, state.kinematic_direction)
                {
                    if let Some(normalized) = projected.try_normalize(1.0e-6) {
                        state.kinematic_tangent = normalized;
                        return;
                    }
                }
            }

            // No usable input direction: steepest descent, or facing on flat
            // ground where no descent exists.
            state.kinematic_tangent = if state.ground_tangent.is_zero() {
                state.transform_direction()
            } else {
                state.ground_tangent
            };
        } else if let Some(normalized) = state.kinematic_direction.try_normalize(1.0e-6) {
            state.kinematic_tangent = normalized;
        } else {
            state.kinematic_tangent = state.transform_direction();
        }
    }

    fn set_kinematic_speed(&self, state: &mut MoverState) {
        state.kinematic_speed = self.kinematic_speed;
    }

    fn set_kinematic_velocity(&self, state: &mut MoverState) {
        let delta_time = state.update_delta_time;
        let mut kinematic_velocity = state.kinematic_velocity;

        if state.is_grounded {
            if !kinematic_velocity.is_almost_zero(ALMOST_ZERO) {
                if let Some(projected) = project_on_ground(state.ground_normal, kinematic_velocity)
                {
                    if let Some(normalized) = projected.try_normalize(1.0e-6) {
                        kinematic_velocity = normalized * kinematic_velocity.norm();
                    }
                }
            }

            if state.kinematic_direction.is_almost_zero(DIRECTION_ALMOST_ZERO) {
                // No input: friction only.
                state.kinematic_velocity = kinematic_velocity
                    + get_ground_friction(
                        kinematic_velocity,
                        kinematic_velocity,
                        Vector::new(1.0, 1.0, 1.0),
                        state.ground_normal,
                        state.kinematic_speed,
                        true,
                        0.0,
                        0.0,
                        self.kinematic_ground_friction,
                        delta_time,
                    );
                return;
            }
        } else if state.kinematic_direction.is_almost_zero(DIRECTION_ALMOST_ZERO) {
            state.kinematic_velocity = kinematic_velocity
                + get_friction(
                    kinematic_velocity,
                    kinematic_velocity,
                    Vector::new(1.0, 0.0, 1.0),
                    state.kinematic_speed,
                    true,
                    0.0,
                    0.0,
                    self.kinematic_air_friction,
                    delta_time,
                );
            return;
        }

        // Acceleration along the tangent competes with friction along the
        // current movement; the combination accelerates turns without letting
        // friction reverse the velocity.
        let move_direction = if kinematic_velocity.is_zero() {
            state.kinematic_tangent
        } else {
            kinematic_velocity
        };

        let (acceleration, friction) = if state.is_grounded {
            (
                get_acceleration(
                    kinematic_velocity,
                    state.kinematic_tangent,
                    Vector::new(1.0, 1.0, 1.0),
                    state.kinematic_speed,
                    false,
                    state.kinematic_direction.norm(),
                    0.0,
                    self.kinematic_ground_acceleration,
                    0.0,
                    delta_time,
                ),
                get_ground_friction(
                    kinematic_velocity,
                    move_direction,
                    Vector::new(1.0, 1.0, 1.0),
                    state.ground_normal,
                    state.kinematic_speed,
                    false,
                    0.0,
                    0.0,
                    self.kinematic_ground_friction,
                    delta_time,
                ),
            )
        } else {
            (
                get_acceleration(
                    kinematic_velocity,
                    state.kinematic_tangent,
                    Vector::new(1.0, 1.0, 1.0),
                    state.kinematic_speed,
                    false,
                    state.kinematic_direction.norm(),
                    0.0,
                    self.kinematic_air_acceleration,
                    0.0,
                    delta_time,
                ),
                get_friction(
                    kinematic_velocity,
                    move_direction,
                    Vector::new(1.0, 0.0, 1.0),
                    state.kinematic_speed,
                    false,
                    0.0,
                    0.0,
                    self.kinematic_air_friction,
                    delta_time,
                ),
            )
        };

        kinematic_velocity =
            combine_acceleration_and_friction(kinematic_velocity, acceleration, friction);

        if kinematic_velocity.norm_squared() > state.kinematic_speed * state.kinematic_speed {
            kinematic_velocity = kinematic_velocity / kinematic_velocity.norm() * state.kinematic_speed;
        }

        // Stable jump height even when running downhill.
        if state.jump_frames > 0 && kinematic_velocity.y < 0.0 {
            kinematic_velocity.y = 0.0;
        }

        state.kinematic_velocity = kinematic_velocity;
    }
}
