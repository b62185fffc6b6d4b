//! Per-actor movement state: the full per-tick snapshot the solver reads and
//! writes, plus the static settings it is configured with.
//!
//! A mover carries at least two instances of [`MoverState`], one for the
//! fixed tick and one for the render tick, and a history ring for rollback.
//! Everything in the state is copyable through [`MoverState::copy_from_other`];
//! two states fed the same copy must behave identically for every subsequent
//! step.

#![forbid(unsafe_code)]

pub mod collections;
pub mod settings;

pub use collections::{Collision, Collisions, Hits, Ignore, Ignores, Modifier, Modifiers, TouchHit};
pub use settings::{
    ActorShape, AuthorityBehavior, FeatureSet, InterpolationMode, MoverSettings,
    SettingsValidation,
};

use std::any::Any;
use std::cell::Cell;

use rapier3d::math::{Rotation, Vector};
use rapier3d::prelude::Real;

/// Gameplay-defined payload carried inside [`MoverState`] and kept in sync
/// with it through every copy, clear and tick boundary.
pub trait UserPayload: Send {
    fn clone_box(&self) -> Box<dyn UserPayload>;

    /// Clears values that must not leak into the next tick while the mover
    /// is inactive.
    fn clear_transient(&mut self);

    /// Full reset between spawns.
    fn clear(&mut self);

    fn copy_from_other(&mut self, other: &dyn UserPayload);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn UserPayload> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Full per-tick simulation state of one actor.
///
/// Look rotation is stored as pitch and yaw in degrees; the derived rotation
/// and direction vectors are cached lazily and invalidated whenever their
/// source angle changes.
#[derive(Clone)]
pub struct MoverState {
    /// Render frame the state was last advanced on.
    pub frame: u64,
    /// Fixed simulation tick the state belongs to.
    pub tick: i64,
    /// Interpolation factor between the previous and current fixed tick,
    /// only meaningful for render states.
    pub alpha: Real,
    /// Simulation time in seconds.
    pub time: f64,
    /// Time span covered by the current step. For render prediction this is
    /// the partial frame delta.
    pub delta_time: Real,
    /// Full delta time of the update this state belongs to.
    pub update_delta_time: Real,

    /// An inactive mover skips movement but keeps tracking its surroundings.
    pub is_active: bool,

    /// Position at the start of the step.
    pub base_position: Vector<Real>,
    /// Position the step wants to reach before collision resolution.
    pub desired_position: Vector<Real>,
    /// Resolved position after collision resolution.
    pub target_position: Vector<Real>,

    look_pitch: Real,
    look_yaw: Real,
    look_rotation_cache: Cell<Option<Rotation<Real>>>,
    look_direction_cache: Cell<Option<Vector<Real>>>,
    transform_rotation_cache: Cell<Option<Rotation<Real>>>,
    transform_direction_cache: Cell<Option<Vector<Real>>>,

    /// Raw, non-interpolated world-space input direction.
    pub input_direction: Vector<Real>,
    /// One-shot jump impulse consumed by the next step.
    pub jump_impulse: Vector<Real>,
    pub gravity: Vector<Real>,

    /// Maximum walkable surface angle in degrees, measured from the
    /// horizontal plane.
    pub max_ground_angle: Real,
    /// Wall band half-width in degrees, measured from the vertical.
    pub max_wall_angle: Real,
    /// Maximum overhang angle in degrees, measured from the vertical.
    pub max_hang_angle: Real,
    /// Depenetration sub-step budget for the current step.
    pub max_penetration_steps: u32,

    /// One-shot velocity added to dynamic velocity, cleared every tick.
    pub external_velocity: Vector<Real>,
    /// Acceleration applied over the tick, cleared every tick.
    pub external_acceleration: Vector<Real>,
    /// One-shot impulse, divided by mass, cleared every tick.
    pub external_impulse: Vector<Real>,
    /// Force applied over the tick, divided by mass, cleared every tick.
    pub external_force: Vector<Real>,
    /// Raw positional delta applied on top of the resolved movement.
    pub external_delta: Vector<Real>,

    /// Desired speed of input-driven movement.
    pub kinematic_speed: Real,
    /// Ground-aligned direction input-driven movement accelerates along.
    pub kinematic_tangent: Vector<Real>,
    /// World-space direction the actor wants to move in.
    pub kinematic_direction: Vector<Real>,
    /// Input-driven part of the velocity.
    pub kinematic_velocity: Vector<Real>,
    /// Environment-driven part of the velocity (gravity, impulses, forces).
    pub dynamic_velocity: Vector<Real>,

    /// Speed actually achieved by the last step.
    pub real_speed: Real,
    /// Velocity actually achieved by the last step.
    pub real_velocity: Vector<Real>,

    /// Ticks since the last jump started; 1 on the jump tick itself.
    pub jump_frames: u32,
    pub has_teleported: bool,

    pub is_grounded: bool,
    pub was_grounded: bool,
    pub is_stepping_up: bool,
    pub was_stepping_up: bool,
    pub is_snapping_to_ground: bool,
    pub was_snapping_to_ground: bool,

    pub ground_normal: Vector<Real>,
    /// Tangent to the ground along the desired movement.
    pub ground_tangent: Vector<Real>,
    /// Closest point on the ground surface.
    pub ground_position: Vector<Real>,
    /// Distance from the capsule surface to the ground.
    pub ground_distance: Real,
    /// Ground surface angle in degrees.
    pub ground_angle: Real,

    pub collisions: Collisions,
    pub modifiers: Modifiers,
    pub ignores: Ignores,
    pub hits: Hits,

    user_payload: Option<Box<dyn UserPayload>>,
}

impl MoverState {
    pub fn new() -> Self {
        Self {
            frame: 0,
            tick: 0,
            alpha: 0.0,
            time: 0.0,
            delta_time: 0.0,
            update_delta_time: 0.0,
            is_active: true,
            base_position: Vector::zeros(),
            desired_position: Vector::zeros(),
            target_position: Vector::zeros(),
            look_pitch: 0.0,
            look_yaw: 0.0,
            look_rotation_cache: Cell::new(None),
            look_direction_cache: Cell::new(None),
            transform_rotation_cache: Cell::new(None),
            transform_direction_cache: Cell::new(None),
            input_direction: Vector::zeros(),
            jump_impulse: Vector::zeros(),
            gravity: Vector::zeros(),
            max_ground_angle: 0.0,
            max_wall_angle: 0.0,
            max_hang_angle: 0.0,
            max_penetration_steps: 0,
            external_velocity: Vector::zeros(),
            external_acceleration: Vector::zeros(),
            external_impulse: Vector::zeros(),
            external_force: Vector::zeros(),
            external_delta: Vector::zeros(),
            kinematic_speed: 0.0,
            kinematic_tangent: Vector::zeros(),
            kinematic_direction: Vector::zeros(),
            kinematic_velocity: Vector::zeros(),
            dynamic_velocity: Vector::zeros(),
            real_speed: 0.0,
            real_velocity: Vector::zeros(),
            jump_frames: 0,
            has_teleported: false,
            is_grounded: false,
            was_grounded: false,
            is_stepping_up: false,
            was_stepping_up: false,
            is_snapping_to_ground: false,
            was_snapping_to_ground: false,
            ground_normal: Vector::zeros(),
            ground_tangent: Vector::zeros(),
            ground_position: Vector::zeros(),
            ground_distance: 0.0,
            ground_angle: 0.0,
            collisions: Collisions::new(),
            modifiers: Modifiers::new(),
            ignores: Ignores::new(),
            hits: Hits::new(),
            user_payload: None,
        }
    }

    /// Pitch in degrees, positive looks down.
    pub fn look_pitch(&self) -> Real {
        self.look_pitch
    }

    /// Yaw in degrees, positive turns clockwise when seen from above.
    pub fn look_yaw(&self) -> Real {
        self.look_yaw
    }

    pub fn set_look_pitch(&mut self, pitch: Real) {
        if self.look_pitch != pitch {
            self.look_pitch = pitch;
            self.look_rotation_cache.set(None);
            self.look_direction_cache.set(None);
        }
    }

    pub fn set_look_yaw(&mut self, yaw: Real) {
        if self.look_yaw != yaw {
            self.look_yaw = yaw;
            self.look_rotation_cache.set(None);
            self.look_direction_cache.set(None);
            self.transform_rotation_cache.set(None);
            self.transform_direction_cache.set(None);
        }
    }

    /// Sets pitch and yaw, clamping pitch to -90..=90 degrees and wrapping
    /// yaw into -180..180.
    pub fn set_look(&mut self, pitch: Real, yaw: Real) {
        let (pitch, yaw) = mover_math::clamp_look_angles(pitch, yaw);

        self.set_look_pitch(pitch);
        self.set_look_yaw(yaw);
    }

    /// Adds pitch and yaw deltas with the same clamping as [`Self::set_look`].
    pub fn add_look(&mut self, pitch_delta: Real, yaw_delta: Real) {
        if pitch_delta != 0.0 {
            self.set_look_pitch((self.look_pitch + pitch_delta).clamp(-90.0, 90.0));
        }

        if yaw_delta != 0.0 {
            self.set_look_yaw(mover_math::wrap_yaw(self.look_yaw + yaw_delta));
        }
    }

    /// Adds pitch and yaw deltas, clamping pitch to a custom range within
    /// -90..=90 degrees.
    pub fn add_look_clamped(
        &mut self,
        pitch_delta: Real,
        yaw_delta: Real,
        min_pitch: Real,
        max_pitch: Real,
    ) {
        if pitch_delta != 0.0 {
            let min_pitch = min_pitch.max(-90.0);
            let mut max_pitch = max_pitch.min(90.0);

            if max_pitch < min_pitch {
                max_pitch = min_pitch;
            }

            self.set_look_pitch((self.look_pitch + pitch_delta).clamp(min_pitch, max_pitch));
        }

        if yaw_delta != 0.0 {
            self.set_look_yaw(mover_math::wrap_yaw(self.look_yaw + yaw_delta));
        }
    }

    /// Combined pitch and yaw rotation.
    pub fn look_rotation(&self) -> Rotation<Real> {
        if let Some(rotation) = self.look_rotation_cache.get() {
            return rotation;
        }

        let rotation = mover_math::look_rotation(self.look_pitch, self.look_yaw);
        self.look_rotation_cache.set(Some(rotation));
        rotation
    }

    /// Forward vector of [`Self::look_rotation`].
    pub fn look_direction(&self) -> Vector<Real> {
        if let Some(direction) = self.look_direction_cache.get() {
            return direction;
        }

        let direction = mover_math::look_direction(self.look_pitch, self.look_yaw);
        self.look_direction_cache.set(Some(direction));
        direction
    }

    /// Yaw-only rotation, the one applied to the actor's body.
    pub fn transform_rotation(&self) -> Rotation<Real> {
        if let Some(rotation) = self.transform_rotation_cache.get() {
            return rotation;
        }

        let rotation = mover_math::yaw_rotation(self.look_yaw);
        self.transform_rotation_cache.set(Some(rotation));
        rotation
    }

    /// Horizontal forward vector of the actor's body.
    pub fn transform_direction(&self) -> Vector<Real> {
        if let Some(direction) = self.transform_direction_cache.get() {
            return direction;
        }

        let direction = mover_math::yaw_direction(self.look_yaw);
        self.transform_direction_cache.set(Some(direction));
        direction
    }

    /// Combined kinematic and dynamic velocity.
    pub fn desired_velocity(&self) -> Vector<Real> {
        self.kinematic_velocity + self.dynamic_velocity
    }

    /// True on the tick a jump started.
    pub fn has_jumped(&self) -> bool {
        self.jump_frames == 1
    }

    /// True when the mover just left the ground this step.
    pub fn is_on_edge(&self) -> bool {
        !self.is_grounded && self.was_grounded
    }

    pub fn user_payload(&self) -> Option<&dyn UserPayload> {
        self.user_payload.as_deref()
    }

    pub fn user_payload_mut(&mut self) -> Option<&mut (dyn UserPayload + 'static)> {
        match self.user_payload.as_mut() {
            Some(payload) => Some(payload.as_mut()),
            None => None,
        }
    }

    pub fn set_user_payload(&mut self, payload: Option<Box<dyn UserPayload>>) {
        self.user_payload = payload;
    }

    /// Clears values that must not carry over to the next tick while the
    /// mover is inactive.
    pub fn clear_transient_properties(&mut self) {
        self.jump_frames = 0;
        self.jump_impulse = Vector::zeros();
        self.external_velocity = Vector::zeros();
        self.external_acceleration = Vector::zeros();
        self.external_impulse = Vector::zeros();
        self.external_force = Vector::zeros();

        if let Some(payload) = self.user_payload.as_mut() {
            payload.clear_transient();
        }
    }

    /// Releases interaction sets and user data; called between spawns.
    pub fn clear(&mut self) {
        if let Some(payload) = self.user_payload.as_mut() {
            payload.clear();
        }

        self.collisions.clear();
        self.modifiers.clear();
        self.ignores.clear();
        self.hits.clear();
    }

    /// Replicates the complete state of `other`, interaction sets and user
    /// payload included.
    pub fn copy_from_other(&mut self, other: &Self) {
        self.frame = other.frame;
        self.tick = other.tick;
        self.alpha = other.alpha;
        self.time = other.time;
        self.delta_time = other.delta_time;
        self.update_delta_time = other.update_delta_time;
        self.is_active = other.is_active;
        self.base_position = other.base_position;
        self.desired_position = other.desired_position;
        self.target_position = other.target_position;

        self.look_pitch = other.look_pitch;
        self.look_yaw = other.look_yaw;
        self.look_rotation_cache.set(other.look_rotation_cache.get());
        self.look_direction_cache.set(other.look_direction_cache.get());
        self.transform_rotation_cache
            .set(other.transform_rotation_cache.get());
        self.transform_direction_cache
            .set(other.transform_direction_cache.get());

        self.input_direction = other.input_direction;
        self.jump_impulse = other.jump_impulse;
        self.gravity = other.gravity;
        self.max_ground_angle = other.max_ground_angle;
        self.max_wall_angle = other.max_wall_angle;
        self.max_hang_angle = other.max_hang_angle;
        self.max_penetration_steps = other.max_penetration_steps;
        self.external_velocity = other.external_velocity;
        self.external_acceleration = other.external_acceleration;
        self.external_impulse = other.external_impulse;
        self.external_force = other.external_force;
        self.external_delta = other.external_delta;

        self.kinematic_speed = other.kinematic_speed;
        self.kinematic_tangent = other.kinematic_tangent;
        self.kinematic_direction = other.kinematic_direction;
        self.kinematic_velocity = other.kinematic_velocity;
        self.dynamic_velocity = other.dynamic_velocity;

        self.real_speed = other.real_speed;
        self.real_velocity = other.real_velocity;
        self.jump_frames = other.jump_frames;
        self.has_teleported = other.has_teleported;
        self.is_grounded = other.is_grounded;
        self.was_grounded = other.was_grounded;
        self.is_stepping_up = other.is_stepping_up;
        self.was_stepping_up = other.was_stepping_up;
        self.is_snapping_to_ground = other.is_snapping_to_ground;
        self.was_snapping_to_ground = other.was_snapping_to_ground;
        self.ground_normal = other.ground_normal;
        self.ground_tangent = other.ground_tangent;
        self.ground_position = other.ground_position;
        self.ground_distance = other.ground_distance;
        self.ground_angle = other.ground_angle;

        self.collisions.copy_from_other(&other.collisions);
        self.modifiers.copy_from_other(&other.modifiers);
        self.ignores.copy_from_other(&other.ignores);
        self.hits.copy_from_other(&other.hits);

        match (self.user_payload.as_mut(), other.user_payload.as_deref()) {
            (Some(target), Some(source)) => target.copy_from_other(source),
            (None, Some(source)) => self.user_payload = Some(source.clone_box()),
            (Some(_), None) => self.user_payload = None,
            (None, None) => {}
        }
    }
}

impl Default for MoverState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(actual: Real, expected: Real) {
        assert!(
            (actual - expected).abs() < 1.0e-4,
            "expected {expected}, got {actual}"
        );
    }

    #[derive(Clone, Default)]
    struct StaminaPayload {
        stamina: Real,
        sprint_pressed: bool,
    }

    impl UserPayload for StaminaPayload {
        fn clone_box(&self) -> Box<dyn UserPayload> {
            Box::new(self.clone())
        }

        fn clear_transient(&mut self) {
            self.sprint_pressed = false;
        }

        fn clear(&mut self) {
            self.stamina = 0.0;
            self.sprint_pressed = false;
        }

        fn copy_from_other(&mut self, other: &dyn UserPayload) {
            if let Some(other) = other.as_any().downcast_ref::<Self>() {
                self.stamina = other.stamina;
                self.sprint_pressed = other.sprint_pressed;
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn pitch_change_keeps_transform_rotation() {
        let mut state = MoverState::new();
        state.set_look(10.0, 45.0);

        let transform_before = state.transform_rotation();
        let look_before = state.look_rotation();

        state.set_look_pitch(25.0);

        assert_eq!(state.transform_rotation(), transform_before);
        assert_ne!(state.look_rotation(), look_before);
    }

    #[test]
    fn yaw_change_invalidates_all_rotations() {
        let mut state = MoverState::new();
        state.set_look(10.0, 45.0);

        let transform_before = state.transform_rotation();
        let look_before = state.look_rotation();

        state.set_look_yaw(90.0);

        assert_ne!(state.transform_rotation(), transform_before);
        assert_ne!(state.look_rotation(), look_before);
    }

    #[test]
    fn add_look_wraps_yaw_and_clamps_pitch() {
        let mut state = MoverState::new();
        state.set_look(80.0, 170.0);

        state.add_look(30.0, 20.0);

        assert_near(state.look_pitch(), 90.0);
        assert_near(state.look_yaw(), -170.0);
    }

    #[test]
    fn add_look_clamped_respects_custom_range() {
        let mut state = MoverState::new();
        state.set_look(0.0, 0.0);

        state.add_look_clamped(-50.0, 0.0, -30.0, 30.0);

        assert_near(state.look_pitch(), -30.0);
    }

    #[test]
    fn copy_replicates_derived_look_values() {
        let mut source = MoverState::new();
        source.set_look(15.0, -60.0);
        source.kinematic_velocity = Vector::new(1.0, 0.0, 2.0);
        source.dynamic_velocity = Vector::new(0.0, -3.0, 0.0);
        source.is_grounded = true;
        source.modifiers.add(7);

        let mut copy = MoverState::new();
        copy.copy_from_other(&source);

        assert_eq!(copy.look_rotation(), source.look_rotation());
        assert_eq!(copy.look_direction(), source.look_direction());
        assert_eq!(copy.desired_velocity(), source.desired_velocity());
        assert!(copy.is_grounded);
        assert!(copy.modifiers.has_actor(7));
    }

    #[test]
    fn transient_clear_keeps_velocities() {
        let mut state = MoverState::new();
        state.jump_frames = 3;
        state.jump_impulse = Vector::new(0.0, 5.0, 0.0);
        state.external_impulse = Vector::new(1.0, 0.0, 0.0);
        state.dynamic_velocity = Vector::new(0.0, -9.0, 0.0);

        state.clear_transient_properties();

        assert_eq!(state.jump_frames, 0);
        assert_eq!(state.jump_impulse, Vector::zeros());
        assert_eq!(state.external_impulse, Vector::zeros());
        assert_eq!(state.dynamic_velocity, Vector::new(0.0, -9.0, 0.0));
    }

    #[test]
    fn derived_flags_follow_fields() {
        let mut state = MoverState::new();

        state.jump_frames = 1;
        assert!(state.has_jumped());
        state.jump_frames = 2;
        assert!(!state.has_jumped());

        state.is_grounded = false;
        state.was_grounded = true;
        assert!(state.is_on_edge());
    }

    #[test]
    fn user_payload_follows_copy_and_clear() {
        let mut source = MoverState::new();
        source.set_user_payload(Some(Box::new(StaminaPayload {
            stamina: 0.75,
            sprint_pressed: true,
        })));

        let mut copy = MoverState::new();
        copy.copy_from_other(&source);

        {
            let payload = copy
                .user_payload()
                .and_then(|payload| payload.as_any().downcast_ref::<StaminaPayload>())
                .unwrap();
            assert_near(payload.stamina, 0.75);
            assert!(payload.sprint_pressed);
        }

        copy.clear_transient_properties();
        {
            let payload = copy
                .user_payload()
                .and_then(|payload| payload.as_any().downcast_ref::<StaminaPayload>())
                .unwrap();
            assert!(!payload.sprint_pressed);
            assert_near(payload.stamina, 0.75);
        }

        copy.clear();
        let payload = copy
            .user_payload()
            .and_then(|payload| payload.as_any().downcast_ref::<StaminaPayload>())
            .unwrap();
        assert_near(payload.stamina, 0.0);
    }
}
