//! Deterministic kinematic character movement on top of scene queries.
//!
//! The crate is built around [`Mover`], which owns the per-actor state pair
//! (fixed and render), a rollback history ring and the reusable query caches.
//! A fixed tick runs [`Mover::move_predicted`]: desired movement is derived
//! from the state, long displacements are split into capsule-radius-sized
//! steps, every step is depenetrated against the scene and offered to
//! [`stages::MoverProcessor`] implementations, and the final state is
//! published to the history ring. Render frames run
//! [`Mover::move_interpolated`], which reconstructs an in-between state from
//! the history and blends out mispredictions instead of snapping.
//!
//! The solver never reads the wall clock and performs no allocation in the
//! steady state; two movers fed the same state and inputs produce bitwise
//! identical results, which is what makes client-side prediction and rollback
//! possible.

#![forbid(unsafe_code)]

pub mod depenetration;
pub mod resolver;
pub mod stages;
pub mod trace;

pub use resolver::CorrectionResolver;
pub use stages::{MoverProcessor, ProcessorGroup, Stage, StageContext, StageExecutor};
pub use trace::{ExecutionTrace, TraceInfo, TraceKind};

use collision_cache::{OverlapInfo, SceneQuery, SweepInfo, TriggerInteraction};
use mover_math::VectorExt;
use mover_state::{ActorShape, Collision, FeatureSet, MoverSettings, MoverState};
use rapier3d::math::Vector;
use rapier3d::prelude::{ColliderHandle, Real, RigidBodyHandle};
use solver_core::{anomaly, logging};

/// Number of fixed ticks kept in the rollback history ring.
pub const HISTORY_SIZE: usize = 60;

/// Below this fixed delta time the move is extrapolated from the last known
/// velocity instead of being solved.
pub const EXTRAPOLATION_DELTA_TIME_THRESHOLD: Real = 0.00005;

/// How the tracked-hits cache is refreshed after a move step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HitsOverlapQuery {
    /// Reuse the wide step overlap if all of its hits are within the tracking
    /// extent, otherwise run a new query.
    Default,
    /// Reuse the wide step overlap unconditionally.
    Reuse,
    /// Always run a new query.
    New,
}

/// One kinematic actor: settings, state pair, history and query caches.
///
/// The mover does not own the scene. Every operation that touches geometry
/// takes a [`SceneQuery`] so the same mover can be driven by any backend; the
/// body and collider handles passed to [`Mover::new`] identify the actor
/// inside that backend and are excluded from all of its own queries.
pub struct Mover {
    actor_id: u64,
    settings: MoverSettings,
    body: RigidBodyHandle,
    collider: Option<ColliderHandle>,

    fixed: MoverState,
    render: MoverState,
    history: Vec<Option<Box<MoverState>>>,

    extended_overlap: OverlapInfo,
    track_overlap: OverlapInfo,
    after_step_overlap: OverlapInfo,
    empty_overlap: OverlapInfo,

    resolver: CorrectionResolver,
    executor: StageExecutor,
    trace: ExecutionTrace,

    /// Feature set snapshotted at the start of the last predicted move so a
    /// settings change cannot flip behavior mid-move.
    active_features: FeatureSet,
    prediction_error: Vector<Real>,
    last_render_position: Vector<Real>,
    last_render_time: f64,
    last_anti_jitter_position: Vector<Real>,
    presented_position: Vector<Real>,
    /// Last collider rejected for carrying no actor id; skips the scene
    /// lookup while the mover keeps rubbing against the same geometry.
    last_non_actor_collider: Option<ColliderHandle>,

    add_scratch: Vec<ColliderHandle>,
    remove_scratch: Vec<Collision>,
}

impl Mover {
    /// Creates a mover for an actor already registered with the scene
    /// backend, standing with its capsule feet at `position`.
    pub fn new(
        settings: MoverSettings,
        actor_id: u64,
        body: RigidBodyHandle,
        collider: Option<ColliderHandle>,
        position: Vector<Real>,
    ) -> Self {
        let active_features = settings.features;

        let mut fixed = MoverState::new();
        fixed.gravity = Vector::new(0.0, -9.81, 0.0);
        fixed.max_ground_angle = 60.0;
        fixed.max_wall_angle = 5.0;
        fixed.max_hang_angle = 30.0;
        fixed.base_position = position;
        fixed.desired_position = position;
        fixed.target_position = position;

        let mut render = MoverState::new();
        render.copy_from_other(&fixed);

        let mut history = Vec::with_capacity(HISTORY_SIZE);
        history.resize_with(HISTORY_SIZE, || None);

        Self {
            actor_id,
            settings,
            body,
            collider,
            fixed,
            render,
            history,
            extended_overlap: OverlapInfo::default(),
            track_overlap: OverlapInfo::default(),
            after_step_overlap: OverlapInfo::default(),
            empty_overlap: OverlapInfo::new(0),
            resolver: CorrectionResolver::default(),
            executor: StageExecutor::new(),
            trace: ExecutionTrace::new(),
            active_features,
            prediction_error: Vector::zeros(),
            last_render_position: position,
            last_render_time: 0.0,
            last_anti_jitter_position: position,
            presented_position: position,
            last_non_actor_collider: None,
            add_scratch: Vec::new(),
            remove_scratch: Vec::new(),
        }
    }

    pub fn actor_id(&self) -> u64 {
        self.actor_id
    }

    pub fn body(&self) -> RigidBodyHandle {
        self.body
    }

    pub fn collider(&self) -> Option<ColliderHandle> {
        self.collider
    }

    pub fn settings(&self) -> &MoverSettings {
        &self.settings
    }

    /// Settings changes are picked up at the start of the next predicted
    /// move; the collider is reshaped there as well.
    pub fn settings_mut(&mut self) -> &mut MoverSettings {
        &mut self.settings
    }

    /// State of the last predicted fixed tick.
    pub fn fixed_state(&self) -> &MoverState {
        &self.fixed
    }

    pub fn fixed_state_mut(&mut self) -> &mut MoverState {
        &mut self.fixed
    }

    /// State of the last render frame.
    pub fn render_state(&self) -> &MoverState {
        &self.render
    }

    pub fn render_state_mut(&mut self) -> &mut MoverState {
        &mut self.render
    }

    /// Anti-jittered position written out for presentation. Distinct from
    /// the physics body position, which always gets the raw target.
    pub fn presented_position(&self) -> Vector<Real> {
        self.presented_position
    }

    /// Residual render offset still being blended out.
    pub fn prediction_error(&self) -> Vector<Real> {
        self.prediction_error
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut ExecutionTrace {
        &mut self.trace
    }

    /// Fixed state recorded for `tick`, if it is still inside the history
    /// ring.
    pub fn history_state(&self, tick: i64) -> Option<&MoverState> {
        stored_history(&self.history, tick)
    }

    // Input and one-shot mutators. Each writes both the render and the fixed
    // state so the value is visible to the very next move regardless of
    // which timeframe runs first.

    pub fn set_active(&mut self, is_active: bool) {
        self.render.is_active = is_active;
        self.fixed.is_active = is_active;
    }

    /// Sets the world-space input direction, clamped to unit length.
    pub fn set_input_direction(&mut self, mut direction: Vector<Real>) {
        let magnitude = direction.norm();
        if magnitude > 1.0 {
            direction /= magnitude;
        }

        self.render.input_direction = direction;
        self.fixed.input_direction = direction;
    }

    pub fn set_look(&mut self, pitch: Real, yaw: Real) {
        self.render.set_look(pitch, yaw);
        self.fixed.set_look(pitch, yaw);
    }

    pub fn add_look(&mut self, pitch_delta: Real, yaw_delta: Real) {
        self.render.add_look(pitch_delta, yaw_delta);
        self.fixed.add_look(pitch_delta, yaw_delta);
    }

    pub fn add_look_clamped(
        &mut self,
        pitch_delta: Real,
        yaw_delta: Real,
        min_pitch: Real,
        max_pitch: Real,
    ) {
        self.render
            .add_look_clamped(pitch_delta, yaw_delta, min_pitch, max_pitch);
        self.fixed
            .add_look_clamped(pitch_delta, yaw_delta, min_pitch, max_pitch);
    }

    /// Queues a jump impulse for the next move.
    pub fn jump(&mut self, impulse: Vector<Real>) {
        self.render.jump_impulse += impulse;
        self.fixed.jump_impulse += impulse;
    }

    pub fn add_external_velocity(&mut self, velocity: Vector<Real>) {
        self.render.external_velocity += velocity;
        self.fixed.external_velocity += velocity;
    }

    pub fn set_external_velocity(&mut self, velocity: Vector<Real>) {
        self.render.external_velocity = velocity;
        self.fixed.external_velocity = velocity;
    }

    pub fn add_external_acceleration(&mut self, acceleration: Vector<Real>) {
        self.render.external_acceleration += acceleration;
        self.fixed.external_acceleration += acceleration;
    }

    pub fn set_external_acceleration(&mut self, acceleration: Vector<Real>) {
        self.render.external_acceleration = acceleration;
        self.fixed.external_acceleration = acceleration;
    }

    pub fn add_external_impulse(&mut self, impulse: Vector<Real>) {
        self.render.external_impulse += impulse;
        self.fixed.external_impulse += impulse;
    }

    pub fn set_external_impulse(&mut self, impulse: Vector<Real>) {
        self.render.external_impulse = impulse;
        self.fixed.external_impulse = impulse;
    }

    pub fn add_external_force(&mut self, force: Vector<Real>) {
        self.render.external_force += force;
        self.fixed.external_force += force;
    }

    pub fn set_external_force(&mut self, force: Vector<Real>) {
        self.render.external_force = force;
        self.fixed.external_force = force;
    }

    /// Adds a raw positional delta applied on top of the resolved movement.
    pub fn add_external_delta(&mut self, delta: Vector<Real>) {
        self.render.external_delta += delta;
        self.fixed.external_delta += delta;
    }

    pub fn set_external_delta(&mut self, delta: Vector<Real>) {
        self.render.external_delta = delta;
        self.fixed.external_delta = delta;
    }

    pub fn set_dynamic_velocity(&mut self, velocity: Vector<Real>) {
        self.render.dynamic_velocity = velocity;
        self.fixed.dynamic_velocity = velocity;
    }

    pub fn set_kinematic_velocity(&mut self, velocity: Vector<Real>) {
        self.render.kinematic_velocity = velocity;
        self.fixed.kinematic_velocity = velocity;
    }

    /// Teleports the actor. The flag set here stops an in-flight move and
    /// suppresses interpolation over the jump.
    pub fn set_position(&mut self, scene: &mut dyn SceneQuery, position: Vector<Real>) {
        for state in [&mut self.render, &mut self.fixed] {
            state.base_position = position;
            state.desired_position = position;
            state.target_position = position;
            state.has_teleported = true;
            state.is_stepping_up = false;
            state.is_snapping_to_ground = false;
        }

        self.synchronize_transform(scene, false, false);
    }

    /// Switches between the capsule and the query-only shape. [`ActorShape::None`]
    /// removes the collider from the scene; steps no longer depenetrate.
    pub fn set_shape(&mut self, scene: &mut dyn SceneQuery, shape: ActorShape) {
        self.settings.shape = shape;
        self.refresh_collider(scene);
    }

    /// Runs one predicted fixed tick.
    ///
    /// `tick` is the absolute fixed tick being simulated and `delta_time` its
    /// duration; `frame` groups a fixed move with the render frame it ran on
    /// so the render path can tell the two apart. The resulting state is
    /// copied to the render state and stored in the history ring.
    pub fn move_predicted(
        &mut self,
        scene: &mut dyn SceneQuery,
        processors: &mut [Box<dyn MoverProcessor>],
        frame: u64,
        tick: i64,
        delta_time: Real,
    ) {
        self.trace.begin_fixed_move();

        self.refresh_collider(scene);

        let fixed = &mut self.fixed;
        fixed.frame = frame;
        fixed.tick = tick;
        fixed.alpha = 0.0;
        fixed.time = tick as f64 * delta_time as f64;
        fixed.delta_time = delta_time;
        fixed.update_delta_time = delta_time;

        self.run_predicted_move(scene, processors);

        if !self.fixed.target_position.iter().all(|value| value.is_finite()) {
            anomaly::record_anomaly(format!(
                "actor {} resolved to a non-finite position on tick {}",
                self.actor_id, tick
            ));
        }

        if self.fixed.is_active {
            self.synchronize_transform(scene, false, false);
        }

        self.publish_fixed_state();

        self.trace.end_fixed_move();
    }

    /// Produces the render state for the current frame.
    ///
    /// The render timeframe sits one tick behind the last predicted tick and
    /// `alpha` blends across that tick. `delta_time` is the fixed tick
    /// duration, not the frame duration. Must be called after at least one
    /// [`Mover::move_predicted`]; until the history holds the previous tick
    /// the render state stays on the predicted result.
    pub fn move_interpolated(
        &mut self,
        scene: &mut dyn SceneQuery,
        processors: &mut [Box<dyn MoverProcessor>],
        frame: u64,
        alpha: Real,
        delta_time: Real,
    ) {
        let render = &mut self.render;
        render.frame = frame;
        render.tick = self.fixed.tick;
        render.alpha = alpha;

        let mut previous_time = render.time;
        render.time = self.fixed.time + (alpha * delta_time) as f64;

        // Interpolation timeframe: one tick behind the newest predicted tick.
        render.tick -= 1;
        render.time -= delta_time as f64;
        if render.frame == self.fixed.frame {
            previous_time -= delta_time as f64;
        }

        render.delta_time = (render.time - previous_time) as Real;
        render.update_delta_time = render.delta_time;

        self.update_prediction_error();

        if self.render.is_active {
            self.interpolate_from_history();
            stages::invoke_on_interpolate(processors, &mut self.render, &mut self.trace);
            self.synchronize_transform(scene, true, true);
        }

        self.last_render_position = self.render.target_position;
        self.last_render_time = self.render.time;
    }

    /// Rolls the fixed state back to `tick`. Returns `false` when the tick
    /// is no longer inside the history ring.
    pub fn restore_history(&mut self, scene: &mut dyn SceneQuery, tick: i64) -> bool {
        let restored = match stored_history(&self.history, tick) {
            Some(state) => state,
            None => {
                logging::warn(format!(
                    "actor {} cannot roll back to tick {}, it left the history ring",
                    self.actor_id, tick
                ));
                return false;
            }
        };

        self.fixed.copy_from_other(restored);

        self.refresh_collider(scene);
        if self.fixed.is_active {
            self.synchronize_transform(scene, false, false);
        }

        true
    }

    /// Casts a ray through the scene with the mover's layer mask and ignore
    /// list applied. Hits are sorted by distance.
    pub fn ray_cast(
        &self,
        scene: &dyn SceneQuery,
        sweep: &mut SweepInfo,
        origin: Vector<Real>,
        direction: Vector<Real>,
        max_distance: Real,
        trigger_interaction: TriggerInteraction,
    ) {
        sweep.set_query(
            origin,
            0.0,
            0.0,
            0.0,
            direction,
            max_distance,
            self.settings.collision_layer_mask,
            trigger_interaction,
        );
        sweep.exclude_body = Some(self.body);
        for ignore in self.fixed.ignores.entries() {
            sweep.ignored_colliders.push(ignore.collider);
        }

        scene.cast_ray(sweep);
        sweep.sort_hits();
    }

    /// Full reset between spawns. Exit hooks fire for every tracked
    /// collision before it is dropped.
    pub fn reset(&mut self, processors: &mut [Box<dyn MoverProcessor>]) {
        self.force_remove_all_collisions(processors);

        self.trace.clear();
        self.fixed.clear();
        self.render.clear();
        for slot in &mut self.history {
            *slot = None;
        }

        self.after_step_overlap.reset();
        self.extended_overlap.reset();
        self.track_overlap.reset();

        self.active_features = FeatureSet {
            ccd: false,
            anti_jitter: false,
            prediction_correction: false,
        };
        self.prediction_error = Vector::zeros();
        self.last_render_position = Vector::zeros();
        self.last_render_time = 0.0;
        self.last_anti_jitter_position = Vector::zeros();
        self.presented_position = Vector::zeros();
        self.last_non_actor_collider = None;
    }

    /// The full predicted move: stages, displacement consumption and the
    /// bookkeeping restore afterwards.
    fn run_predicted_move(
        &mut self,
        scene: &mut dyn SceneQuery,
        processors: &mut [Box<dyn MoverProcessor>],
    ) {
        self.active_features = self.settings.features;

        let fixed = &mut self.fixed;
        let base_time = fixed.time;
        let mut base_delta_time = fixed.delta_time;
        let mut base_position = fixed.target_position;
        let mut desired_position = fixed.target_position;
        let was_grounded = fixed.is_grounded;
        let was_stepping_up = fixed.is_stepping_up;
        let was_snapping_to_ground = fixed.is_snapping_to_ground;

        fixed.delta_time = base_delta_time;
        fixed.base_position = base_position;
        fixed.desired_position = desired_position;

        if !fixed.is_active {
            fixed.clear_transient_properties();
            self.force_remove_all_collisions(processors);
            self.force_remove_all_hits();
            return;
        }

        fixed.has_teleported = false;
        fixed.max_penetration_steps = self.settings.max_penetration_steps;
        fixed.jump_frames = 0;

        self.execute_stage(scene, processors, Stage::BeginMove);

        if !self.fixed.is_active {
            self.fixed.clear_transient_properties();
            self.force_remove_all_collisions(processors);
            self.force_remove_all_hits();
            self.execute_stage(scene, processors, Stage::EndMove);
            return;
        }

        // A stage may have rescaled the move.
        base_delta_time = self.fixed.delta_time;
        base_position = self.fixed.base_position;

        if base_delta_time < EXTRAPOLATION_DELTA_TIME_THRESHOLD {
            let fixed = &mut self.fixed;

            let mut extrapolation_velocity = fixed.desired_velocity();
            if fixed.real_velocity.norm_squared() <= extrapolation_velocity.norm_squared() {
                extrapolation_velocity = fixed.real_velocity;
            }

            desired_position = base_position + extrapolation_velocity * base_delta_time;

            fixed.base_position = base_position;
            fixed.desired_position = desired_position;
            fixed.target_position = desired_position;

            self.execute_stage(scene, processors, Stage::EndMove);
            stages::invoke_on_stay(processors, &mut self.fixed, &mut self.trace);
            return;
        }

        self.execute_stage(scene, processors, Stage::PrepareData);
        self.force_remove_all_hits();

        let fixed = &mut self.fixed;
        let mut pending_delta_time = base_delta_time.clamp(0.0, 1.0);
        let mut pending_delta_position =
            fixed.desired_velocity() * pending_delta_time + fixed.external_delta;

        desired_position = fixed.base_position + pending_delta_position;

        fixed.desired_position = desired_position;
        fixed.target_position = fixed.base_position;
        fixed.external_delta = Vector::zeros();

        let radius_multiplier = self.settings.ccd_radius_multiplier.clamp(0.25, 0.75);
        let max_delta_magnitude = self.settings.radius * (radius_multiplier + 0.1);
        let optimal_delta_magnitude = self.settings.radius * radius_multiplier;

        let mut has_finished = false;
        let mut non_teleported_position = fixed.target_position;

        while !has_finished && !self.fixed.has_teleported {
            {
                let fixed = &mut self.fixed;
                fixed.base_position = fixed.target_position;

                let mut consume_delta_time = pending_delta_time;
                let mut consume_delta_position = pending_delta_position;

                if self.active_features.ccd {
                    let consume_delta_magnitude = consume_delta_position.norm();
                    if consume_delta_magnitude > max_delta_magnitude {
                        let delta_ratio = optimal_delta_magnitude / consume_delta_magnitude;
                        consume_delta_time *= delta_ratio;
                        consume_delta_position *= delta_ratio;
                    } else {
                        has_finished = true;
                    }
                } else {
                    has_finished = true;
                }

                pending_delta_time -= consume_delta_time;
                pending_delta_position -= consume_delta_position;

                if pending_delta_time <= 0.0 {
                    pending_delta_time = 0.0;
                }

                fixed.time = base_time - pending_delta_time as f64;
                fixed.delta_time = consume_delta_time;
                fixed.desired_position = fixed.base_position + consume_delta_position;
                fixed.target_position = fixed.desired_position;
                fixed.was_grounded = fixed.is_grounded;
                fixed.was_stepping_up = fixed.is_stepping_up;
                fixed.was_snapping_to_ground = fixed.is_snapping_to_ground;
            }

            self.process_move_step(scene, processors);

            if !self.fixed.has_teleported {
                non_teleported_position = self.fixed.target_position;
            }

            self.update_collisions(&*scene, processors);

            if self.fixed.has_teleported {
                self.refresh_tracked_hits(&*scene, HitsOverlapQuery::New);
                self.update_collisions(&*scene, processors);
            }

            // A processor may push while the move is being consumed.
            if has_finished && !self.fixed.external_delta.is_zero() {
                pending_delta_position += self.fixed.external_delta;
                self.fixed.external_delta = Vector::zeros();
                has_finished = false;
            }
        }

        let fixed = &mut self.fixed;
        fixed.time = base_time;
        fixed.delta_time = base_delta_time;
        fixed.base_position = base_position;
        fixed.desired_position = desired_position;
        fixed.was_grounded = was_grounded;
        fixed.was_stepping_up = was_stepping_up;
        fixed.was_snapping_to_ground = was_snapping_to_ground;
        fixed.real_velocity = (non_teleported_position - fixed.base_position) / fixed.delta_time;
        fixed.real_speed = fixed.real_velocity.norm();

        let mut target_position = fixed.target_position;

        self.execute_stage(scene, processors, Stage::EndMove);

        if self.fixed.target_position != target_position {
            self.refresh_tracked_hits(&*scene, HitsOverlapQuery::New);
            self.update_collisions(&*scene, processors);
        }

        target_position = self.fixed.target_position;

        stages::invoke_on_stay(processors, &mut self.fixed, &mut self.trace);

        if self.fixed.target_position != target_position {
            self.refresh_tracked_hits(&*scene, HitsOverlapQuery::New);
            self.update_collisions(&*scene, processors);
        }
    }

    /// One bounded displacement step: depenetration, hit tracking and the
    /// post-step stage.
    fn process_move_step(
        &mut self,
        scene: &mut dyn SceneQuery,
        processors: &mut [Box<dyn MoverProcessor>],
    ) {
        {
            let fixed = &mut self.fixed;
            fixed.is_grounded = false;
            fixed.is_stepping_up = false;
            fixed.is_snapping_to_ground = false;
            fixed.ground_normal = Vector::zeros();
            fixed.ground_tangent = Vector::zeros();
            fixed.ground_position = Vector::zeros();
            fixed.ground_distance = 0.0;
            fixed.ground_angle = 0.0;
        }

        self.force_remove_all_hits();

        let has_jumped = self.fixed.jump_frames > 0;

        if self.settings.collision_layer_mask != 0 && self.collider.is_some() {
            // The wide overlap feeds both depenetration and hit tracking; by
            // default hits can reuse it and skip the second scene query.
            let (base_extent, base_query) = if self.settings.force_single_overlap_query {
                (self.settings.extent, HitsOverlapQuery::Reuse)
            } else {
                (self.settings.radius, HitsOverlapQuery::Default)
            };

            capsule_overlap(
                &*scene,
                &self.settings,
                &self.fixed,
                &mut self.extended_overlap,
                self.fixed.target_position,
                base_extent,
                TriggerInteraction::Collide,
                Some(self.body),
            );

            let base_position = self.fixed.base_position;
            let target_position = self.fixed.target_position;
            let max_steps = self.fixed.max_penetration_steps;

            self.fixed.target_position = depenetration::resolve_penetration(
                &mut *scene,
                &self.settings,
                &mut self.resolver,
                &mut self.extended_overlap,
                &mut self.fixed,
                base_position,
                target_position,
                !has_jumped,
                max_steps,
                3,
                true,
            );

            update_hits(
                &*scene,
                &self.settings,
                &mut self.fixed,
                &mut self.track_overlap,
                Some(self.body),
                Some(&self.extended_overlap),
                base_query,
            );
        }

        if has_jumped {
            self.fixed.is_grounded = false;
        }

        self.after_step_overlap.copy_from_other(&self.extended_overlap);

        if let Some(query) = self.execute_stage(scene, processors, Stage::AfterMoveStep) {
            update_hits(
                &*scene,
                &self.settings,
                &mut self.fixed,
                &mut self.track_overlap,
                Some(self.body),
                Some(&self.after_step_overlap),
                query,
            );
        }
    }

    /// Runs one stage over the live fixed state. The returned refresh
    /// request is only meaningful for [`Stage::AfterMoveStep`].
    fn execute_stage(
        &mut self,
        scene: &mut dyn SceneQuery,
        processors: &mut [Box<dyn MoverProcessor>],
        stage: Stage,
    ) -> Option<HitsOverlapQuery> {
        let step_overlap = if stage == Stage::AfterMoveStep {
            &self.after_step_overlap
        } else {
            &self.empty_overlap
        };

        let mut ctx = StageContext::new(
            stage,
            &mut *scene,
            &self.settings,
            &mut self.fixed,
            &mut self.resolver,
            step_overlap,
            Some(self.body),
        );

        self.executor.execute(processors, &mut ctx, &mut self.trace);

        ctx.hit_refresh()
    }

    /// Reconciles the tracked collision set with the tracked hits, firing
    /// enter hooks for new colliders and exit hooks for lost ones.
    fn update_collisions(
        &mut self,
        scene: &dyn SceneQuery,
        processors: &mut [Box<dyn MoverProcessor>],
    ) {
        self.remove_scratch.clear();
        self.remove_scratch
            .extend_from_slice(self.fixed.collisions.entries());

        self.add_scratch.clear();
        for hit in self.track_overlap.all_hits() {
            let collider = hit.collider;
            match self
                .remove_scratch
                .iter()
                .position(|collision| collision.collider == collider)
            {
                Some(slot) => {
                    self.remove_scratch.swap_remove(slot);
                }
                None => self.add_scratch.push(collider),
            }
        }

        for index in 0..self.remove_scratch.len() {
            let collision = self.remove_scratch[index];
            for processor in processors.iter_mut() {
                processor.on_exit(&mut self.fixed, &collision);
            }
            self.fixed.collisions.remove(collision.collider);
        }

        for index in 0..self.add_scratch.len() {
            let collider = self.add_scratch[index];
            self.add_collision(scene, processors, collider);
        }
    }

    /// Starts tracking a collider. Anonymous geometry is rejected and
    /// remembered so repeated contacts skip the actor id lookup.
    fn add_collision(
        &mut self,
        scene: &dyn SceneQuery,
        processors: &mut [Box<dyn MoverProcessor>],
        collider: ColliderHandle,
    ) -> bool {
        if self.last_non_actor_collider == Some(collider) {
            return false;
        }

        let collision_actor_id = scene.actor_id(collider);
        if collision_actor_id == 0 {
            self.last_non_actor_collider = Some(collider);
            return false;
        }

        self.fixed.collisions.add(collider, collision_actor_id);

        let collision = Collision {
            collider,
            actor_id: collision_actor_id,
        };
        for processor in processors.iter_mut() {
            processor.on_enter(&mut self.fixed, &collision);
        }

        true
    }

    fn force_remove_all_collisions(&mut self, processors: &mut [Box<dyn MoverProcessor>]) {
        while let Some(collision) = self.fixed.collisions.entries().last().copied() {
            for processor in processors.iter_mut() {
                processor.on_exit(&mut self.fixed, &collision);
            }
            self.fixed.collisions.remove(collision.collider);
        }
    }

    fn force_remove_all_hits(&mut self) {
        self.track_overlap.reset();
        self.extended_overlap.reset();
        self.fixed.hits.clear();
    }

    fn refresh_tracked_hits(&mut self, scene: &dyn SceneQuery, query: HitsOverlapQuery) {
        update_hits(
            scene,
            &self.settings,
            &mut self.fixed,
            &mut self.track_overlap,
            Some(self.body),
            None,
            query,
        );
    }

    /// Lerps the render state between the previous and the newest predicted
    /// tick, offset by the remaining prediction error.
    fn interpolate_from_history(&mut self) {
        if self.fixed.has_teleported {
            return;
        }

        let previous = match stored_history(&self.history, self.fixed.tick - 1) {
            Some(previous) => previous,
            None => return,
        };

        let current = &self.fixed;
        let render = &mut self.render;
        let alpha = render.alpha;

        render.base_position =
            mover_math::lerp_vector(previous.base_position, current.base_position, alpha)
                + self.prediction_error;
        render.desired_position =
            mover_math::lerp_vector(previous.desired_position, current.desired_position, alpha)
                + self.prediction_error;
        render.target_position =
            mover_math::lerp_vector(previous.target_position, current.target_position, alpha)
                + self.prediction_error;

        render.real_velocity =
            mover_math::lerp_vector(previous.real_velocity, current.real_velocity, alpha);
        render.real_speed = mover_math::lerp(previous.real_speed, current.real_speed, alpha);

        if !self.settings.force_predicted_look_rotation {
            render.set_look_pitch(mover_math::lerp(
                previous.look_pitch(),
                current.look_pitch(),
                alpha,
            ));
            render.set_look_yaw(mover_math::interpolate_range(
                previous.look_yaw(),
                current.look_yaw(),
                -180.0,
                180.0,
                alpha,
            ));
        }
    }

    /// Measures how far the last rendered position drifted from the state
    /// history it should have been an interpolation of, and folds the error
    /// into the render positions so it can decay over the next frames.
    fn update_prediction_error(&mut self) {
        if self.active_features.prediction_correction && self.render.frame == self.fixed.frame {
            if let Some(mut state) = stored_history(&self.history, self.render.tick) {
                if self.last_render_time <= state.time {
                    // Walk back until the last rendered time is bracketed.
                    for _ in 0..5 {
                        let previous = match stored_history(&self.history, state.tick - 1) {
                            Some(previous) => previous,
                            None => break,
                        };

                        if self.last_render_time >= previous.time {
                            if state.has_teleported || previous.has_teleported {
                                self.prediction_error = Vector::zeros();
                                return;
                            }

                            let delta_time = state.time - previous.time;
                            if delta_time <= 0.000001 {
                                self.prediction_error = Vector::zeros();
                                return;
                            }

                            let last_render_alpha =
                                ((self.last_render_time - previous.time) / delta_time) as Real;
                            let expected_position = mover_math::lerp_vector(
                                previous.target_position,
                                state.target_position,
                                last_render_alpha,
                            );

                            self.prediction_error =
                                self.last_render_position - expected_position;

                            let teleport_threshold = self.settings.teleport_threshold;
                            if self.prediction_error.norm_squared()
                                >= teleport_threshold * teleport_threshold
                            {
                                self.prediction_error = Vector::zeros();
                                return;
                            }

                            self.prediction_error = mover_math::lerp_vector(
                                self.prediction_error,
                                Vector::zeros(),
                                self.settings.prediction_correction_speed
                                    * self.render.delta_time,
                            );

                            self.render.base_position += self.prediction_error;
                            self.render.desired_position += self.prediction_error;
                            self.render.target_position += self.prediction_error;
                            return;
                        }

                        state = previous;
                    }
                }
            }
        }

        // No bracketing history this frame; keep blending out what is left.
        if self.prediction_error.is_almost_zero(0.000001) {
            self.prediction_error = Vector::zeros();
        } else {
            let decay_alpha =
                self.settings.prediction_correction_speed * self.render.delta_time;

            self.render.base_position -= self.prediction_error;
            self.render.desired_position -= self.prediction_error;
            self.render.target_position -= self.prediction_error;

            self.prediction_error =
                mover_math::lerp_vector(self.prediction_error, Vector::zeros(), decay_alpha);

            self.render.base_position += self.prediction_error;
            self.render.desired_position += self.prediction_error;
            self.render.target_position += self.prediction_error;
        }
    }

    /// Writes the target position to the scene and computes the presented
    /// position, holding it still while movement stays below the anti-jitter
    /// distance.
    fn synchronize_transform(
        &mut self,
        scene: &mut dyn SceneQuery,
        render: bool,
        allow_anti_jitter: bool,
    ) {
        let state = if render { &self.render } else { &self.fixed };
        let mut target_position = state.target_position;

        scene.set_actor_position(self.body, target_position);

        if allow_anti_jitter
            && self.active_features.anti_jitter
            && self.settings.anti_jitter_distance != [0.0, 0.0]
        {
            let target_delta = target_position - self.last_anti_jitter_position;

            let teleport_threshold = self.settings.teleport_threshold;
            if target_delta.norm_squared() < teleport_threshold * teleport_threshold {
                target_position = self.last_anti_jitter_position;

                let distance_y = target_delta.y.abs();
                if distance_y > 0.000001 && distance_y > self.settings.anti_jitter_distance[1] {
                    target_position.y += target_delta.y
                        * ((distance_y - self.settings.anti_jitter_distance[1]) / distance_y)
                            .clamp(0.0, 1.0);
                }

                let target_delta_xz = target_delta.only_xz();
                let distance_xz = target_delta_xz.norm();
                if distance_xz > 0.000001 && distance_xz > self.settings.anti_jitter_distance[0] {
                    target_position += target_delta_xz
                        * ((distance_xz - self.settings.anti_jitter_distance[0]) / distance_xz)
                            .clamp(0.0, 1.0);
                }
            }

            self.last_anti_jitter_position = target_position;
        }

        self.presented_position = target_position;
    }

    /// Copies the fixed state to the render state and stores it in the
    /// history ring.
    fn publish_fixed_state(&mut self) {
        self.render.copy_from_other(&self.fixed);

        let slot = self.fixed.tick.rem_euclid(HISTORY_SIZE as i64) as usize;
        match self.history[slot].as_deref_mut() {
            Some(stored) => stored.copy_from_other(&self.fixed),
            None => self.history[slot] = Some(Box::new(self.fixed.clone())),
        }
    }

    /// Clamps the settings shape values and pushes them to the scene
    /// collider, or removes the collider for query-only actors.
    fn refresh_collider(&mut self, scene: &mut dyn SceneQuery) {
        if self.settings.shape == ActorShape::None {
            if let Some(collider) = self.collider.take() {
                scene.remove_collider(collider);
            }
            return;
        }

        self.settings.radius = self.settings.radius.max(0.01);
        self.settings.height = self.settings.height.max(self.settings.radius * 2.0);
        self.settings.extent = self.settings.extent.max(0.0);

        if let Some(collider) = self.collider {
            scene.update_actor(
                collider,
                self.settings.radius,
                self.settings.height,
                self.settings.collider_layer,
                self.settings.is_trigger,
            );
        }
    }
}

fn stored_history(history: &[Option<Box<MoverState>>], tick: i64) -> Option<&MoverState> {
    if tick < 0 {
        return None;
    }

    let slot = (tick as usize) % HISTORY_SIZE;
    history[slot].as_deref().filter(|state| state.tick == tick)
}

/// Overlaps the actor capsule standing at `position`, with the mover's own
/// body and ignore list excluded.
#[allow(clippy::too_many_arguments)]
fn capsule_overlap(
    scene: &dyn SceneQuery,
    settings: &MoverSettings,
    state: &MoverState,
    overlap: &mut OverlapInfo,
    position: Vector<Real>,
    extent: Real,
    trigger_interaction: TriggerInteraction,
    exclude_body: Option<RigidBodyHandle>,
) {
    overlap.set_query(
        position,
        settings.radius,
        settings.height,
        extent,
        settings.collision_layer_mask,
        trigger_interaction,
    );
    overlap.exclude_body = exclude_body;
    for ignore in state.ignores.entries() {
        overlap.ignored_colliders.push(ignore.collider);
    }

    scene.overlap_capsule(overlap);
}

/// Refreshes the tracked-hits cache and rebuilds the state's hit set from it.
///
/// When a fresh query runs with a base overlap present, hits found in both
/// keep the classification the base overlap computed for them.
#[allow(clippy::too_many_arguments)]
fn update_hits(
    scene: &dyn SceneQuery,
    settings: &MoverSettings,
    state: &mut MoverState,
    track_overlap: &mut OverlapInfo,
    exclude_body: Option<RigidBodyHandle>,
    base_overlap: Option<&OverlapInfo>,
    query: HitsOverlapQuery,
) {
    match (query, base_overlap) {
        (HitsOverlapQuery::Default, Some(base)) if base.all_hits_within_extent() => {
            track_overlap.copy_from_other(base);
        }
        (HitsOverlapQuery::Reuse, Some(base)) => {
            track_overlap.copy_from_other(base);
        }
        (_, base_overlap) => {
            capsule_overlap(
                scene,
                settings,
                state,
                track_overlap,
                state.target_position,
                settings.extent,
                TriggerInteraction::Collide,
                exclude_body,
            );

            if let Some(base) = base_overlap {
                for tracked in track_overlap.all_hits_mut() {
                    for based in base.all_hits() {
                        if tracked.collider == based.collider {
                            *tracked = *based;
                        }
                    }
                }
            }
        }
    }

    state.hits.clear();
    for hit in track_overlap.all_hits() {
        state.hits.add(hit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::prelude::ColliderBuilder;
    use scene_rapier::Scene;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const RADIUS: Real = 0.35;
    const HEIGHT: Real = 1.8;
    const DT: Real = 1.0 / 60.0;

    fn floor_scene() -> (Scene, ColliderHandle) {
        let mut scene = Scene::new();
        let floor = scene.insert_static_collider(ColliderBuilder::cuboid(10.0, 0.5, 10.0).build());
        (scene, floor)
    }

    fn spawn(scene: &mut Scene, position: Vector<Real>) -> Mover {
        let settings = MoverSettings::default();
        let (body, collider) =
            scene.insert_actor(position, settings.radius, settings.height, settings.collider_layer, 7);
        Mover::new(settings, 7, body, Some(collider), position)
    }

    fn stage_count(trace: &ExecutionTrace, name: &str) -> usize {
        trace
            .records()
            .iter()
            .filter(|record| record.is_stage() && record.name() == name)
            .count()
    }

    struct ConstantVelocity {
        knob: Rc<Cell<Real>>,
        direction: Vector<Real>,
    }

    impl ConstantVelocity {
        fn boxed(knob: &Rc<Cell<Real>>, direction: Vector<Real>) -> Box<dyn MoverProcessor> {
            Box::new(Self {
                knob: Rc::clone(knob),
                direction,
            })
        }
    }

    impl MoverProcessor for ConstantVelocity {
        fn name(&self) -> &'static str {
            "ConstantVelocity"
        }

        fn prepare_data(&mut self, ctx: &mut StageContext<'_>) {
            ctx.state.kinematic_velocity = self.direction * self.knob.get();
        }
    }

    struct GravityDrop;

    impl MoverProcessor for GravityDrop {
        fn name(&self) -> &'static str {
            "GravityDrop"
        }

        fn prepare_data(&mut self, ctx: &mut StageContext<'_>) {
            ctx.state.dynamic_velocity = Vector::new(0.0, -4.0, 0.0);
        }
    }

    struct Teleporter {
        destination: Vector<Real>,
        fired: bool,
    }

    impl MoverProcessor for Teleporter {
        fn name(&self) -> &'static str {
            "Teleporter"
        }

        fn after_move_step(&mut self, ctx: &mut StageContext<'_>) {
            if self.fired {
                return;
            }
            self.fired = true;

            ctx.state.base_position = self.destination;
            ctx.state.desired_position = self.destination;
            ctx.state.target_position = self.destination;
            ctx.state.has_teleported = true;
        }
    }

    struct HookRecorder {
        events: Rc<RefCell<Vec<(bool, u64)>>>,
    }

    impl MoverProcessor for HookRecorder {
        fn name(&self) -> &'static str {
            "HookRecorder"
        }

        fn on_enter(&mut self, _state: &mut MoverState, collision: &Collision) {
            self.events.borrow_mut().push((true, collision.actor_id));
        }

        fn on_exit(&mut self, _state: &mut MoverState, collision: &Collision) {
            self.events.borrow_mut().push((false, collision.actor_id));
        }
    }

    #[test]
    fn gravity_settles_on_the_floor() {
        let (mut scene, floor) = floor_scene();
        let mut mover = spawn(&mut scene, Vector::new(0.0, 1.0, 0.0));
        let mut processors: Vec<Box<dyn MoverProcessor>> = vec![Box::new(GravityDrop)];

        for tick in 1..=40 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
        }

        let state = mover.fixed_state();
        assert!(state.is_grounded);
        assert!((state.target_position.y - 0.5).abs() < 0.05);
        assert!(state.ground_normal.y > 0.99);
        assert!(state.real_speed < 0.1);

        // The floor is anonymous geometry: tracked as a hit, never as a
        // collision.
        assert!(state.hits.has_collider(floor));
        assert!(state.collisions.entries().is_empty());
    }

    #[test]
    fn ccd_substeps_long_displacements() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let knob = Rc::new(Cell::new(60.0));
        let mut processors = vec![ConstantVelocity::boxed(&knob, Vector::new(1.0, 0.0, 0.0))];

        mover.trace_mut().set_enabled(true);

        // One meter per tick against a 0.2975 m step bound: four steps.
        mover.move_predicted(&mut scene, &mut processors, 1, 1, DT);
        assert_eq!(stage_count(mover.trace(), "AfterMoveStep"), 4);
        assert!((mover.fixed_state().target_position.x - 1.0).abs() < 1.0e-4);
        assert!((mover.fixed_state().real_speed - 60.0).abs() < 0.01);

        mover.settings_mut().features.ccd = false;
        mover.move_predicted(&mut scene, &mut processors, 2, 2, DT);
        assert_eq!(stage_count(mover.trace(), "AfterMoveStep"), 1);
        assert!((mover.fixed_state().target_position.x - 2.0).abs() < 1.0e-4);
    }

    #[test]
    fn teleport_stops_remaining_substeps() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let knob = Rc::new(Cell::new(60.0));
        let destination = Vector::new(0.0, 10.0, 0.0);
        let mut processors = vec![
            ConstantVelocity::boxed(&knob, Vector::new(1.0, 0.0, 0.0)),
            Box::new(Teleporter {
                destination,
                fired: false,
            }) as Box<dyn MoverProcessor>,
        ];

        mover.trace_mut().set_enabled(true);
        mover.move_predicted(&mut scene, &mut processors, 1, 1, DT);

        assert_eq!(stage_count(mover.trace(), "AfterMoveStep"), 1);
        assert_eq!(mover.fixed_state().target_position, destination);
        assert!(mover.fixed_state().has_teleported);
        assert_eq!(mover.fixed_state().real_speed, 0.0);
    }

    #[test]
    fn actor_contacts_raise_enter_and_exit_hooks() {
        let mut scene = Scene::new();
        scene.insert_actor(Vector::new(1.0, 0.0, 0.0), RADIUS, HEIGHT, 1, 42);
        let mut mover = spawn(&mut scene, Vector::zeros());

        let events = Rc::new(RefCell::new(Vec::new()));
        let knob = Rc::new(Cell::new(2.0));
        let mut processors = vec![
            ConstantVelocity::boxed(&knob, Vector::new(1.0, 0.0, 0.0)),
            Box::new(HookRecorder {
                events: Rc::clone(&events),
            }) as Box<dyn MoverProcessor>,
        ];

        for tick in 1..=25 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
        }
        assert!(mover.fixed_state().collisions.has_actor(42));

        knob.set(-2.0);
        for tick in 26..=50 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
        }
        assert!(!mover.fixed_state().collisions.has_actor(42));

        assert_eq!(*events.borrow(), vec![(true, 42), (false, 42)]);
    }

    #[test]
    fn history_restores_and_resimulates_identically() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let knob = Rc::new(Cell::new(1.0));
        let mut processors = vec![ConstantVelocity::boxed(
            &knob,
            Vector::new(1.5, 0.0, 0.5).normalize(),
        )];

        let mut recorded = vec![Vector::zeros()];
        for tick in 1..=10 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
            recorded.push(mover.fixed_state().target_position);
        }

        assert_eq!(mover.history_state(7).unwrap().target_position, recorded[7]);

        assert!(mover.restore_history(&mut scene, 5));
        assert_eq!(mover.fixed_state().tick, 5);
        assert_eq!(mover.fixed_state().target_position, recorded[5]);

        for tick in 6..=10 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
            assert_eq!(mover.fixed_state().target_position, recorded[tick as usize]);
        }
    }

    #[test]
    fn restore_rejects_missing_ticks() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let mut processors: Vec<Box<dyn MoverProcessor>> = Vec::new();

        assert!(!mover.restore_history(&mut scene, 3));
        assert!(!mover.restore_history(&mut scene, -1));

        for tick in 1..=70 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
        }

        // Tick 5's slot has been overwritten by tick 65.
        assert!(mover.history_state(5).is_none());
        assert!(mover.history_state(65).is_some());
        assert!(!mover.restore_history(&mut scene, 5));
        assert!(mover.restore_history(&mut scene, 65));
    }

    #[test]
    fn tiny_delta_time_extrapolates() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let mut processors: Vec<Box<dyn MoverProcessor>> = Vec::new();

        mover.fixed_state_mut().kinematic_velocity = Vector::new(2.0, 0.0, 0.0);
        mover.fixed_state_mut().real_velocity = Vector::new(2.0, 0.0, 0.0);
        mover.trace_mut().set_enabled(true);

        mover.move_predicted(&mut scene, &mut processors, 1, 1, 0.00001);

        assert!((mover.fixed_state().target_position.x - 0.00002).abs() < 1.0e-7);
        assert_eq!(stage_count(mover.trace(), "PrepareData"), 0);
        assert_eq!(stage_count(mover.trace(), "EndMove"), 1);
        assert_eq!(stage_count(mover.trace(), "OnStay"), 1);
    }

    #[test]
    fn inactive_mover_skips_the_move() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::new(0.0, 1.0, 0.0));
        let knob = Rc::new(Cell::new(3.0));
        let mut processors = vec![ConstantVelocity::boxed(&knob, Vector::new(1.0, 0.0, 0.0))];

        mover.set_external_impulse(Vector::new(1.0, 1.0, 1.0));
        mover.set_active(false);
        mover.trace_mut().set_enabled(true);

        mover.move_predicted(&mut scene, &mut processors, 1, 1, DT);

        assert_eq!(
            mover.fixed_state().target_position,
            Vector::new(0.0, 1.0, 0.0)
        );
        assert_eq!(mover.fixed_state().external_impulse, Vector::zeros());
        assert_eq!(stage_count(mover.trace(), "BeginMove"), 0);

        // Inactive ticks still publish, so rollback stays consistent.
        assert!(mover.history_state(1).is_some());
    }

    #[test]
    fn anti_jitter_pins_presented_height() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::new(0.0, 1.0, 0.0));
        mover.settings_mut().anti_jitter_distance = [0.0, 0.01];

        let knob = Rc::new(Cell::new(0.3));
        let mut processors = vec![ConstantVelocity::boxed(&knob, Vector::new(0.0, 1.0, 0.0))];

        // Sub-centimeter bobbing never reaches the presented position.
        for frame in 1..=3_i64 {
            knob.set(if frame % 2 == 1 { 0.3 } else { -0.3 });
            mover.move_predicted(&mut scene, &mut processors, frame as u64, frame, DT);
            mover.move_interpolated(&mut scene, &mut processors, frame as u64, 1.0, DT);
            assert!((mover.presented_position().y - 1.0).abs() < 1.0e-6);
        }
        assert!((mover.fixed_state().target_position.y - 1.005).abs() < 1.0e-4);

        // A real drop moves the presented position, lagging by the
        // anti-jitter distance.
        knob.set(-2.0);
        mover.move_predicted(&mut scene, &mut processors, 4, 4, DT);
        mover.move_interpolated(&mut scene, &mut processors, 4, 1.0, DT);

        let target_y = mover.render_state().target_position.y;
        assert!((mover.presented_position().y - (target_y + 0.01)).abs() < 1.0e-4);
    }

    #[test]
    fn prediction_error_smooths_resimulated_path() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let knob = Rc::new(Cell::new(1.0));
        let mut processors = vec![ConstantVelocity::boxed(&knob, Vector::new(1.0, 0.0, 0.0))];

        mover.move_predicted(&mut scene, &mut processors, 1, 1, DT);
        mover.move_interpolated(&mut scene, &mut processors, 1, 0.5, DT);
        mover.move_predicted(&mut scene, &mut processors, 2, 2, DT);
        mover.move_interpolated(&mut scene, &mut processors, 2, 0.5, DT);

        // The rendered position so far interpolated ticks 1..2 at x = 1.5dt.
        assert!((mover.render_state().target_position.x - 1.5 * DT).abs() < 1.0e-6);

        // Rollback and resimulate with doubled speed; the rendered history
        // no longer matches the state history.
        assert!(mover.restore_history(&mut scene, 1));
        knob.set(2.0);
        mover.move_predicted(&mut scene, &mut processors, 3, 2, DT);
        mover.move_predicted(&mut scene, &mut processors, 4, 3, DT);
        mover.move_interpolated(&mut scene, &mut processors, 4, 0.5, DT);

        // Expected render at the last rendered time is now x = 2dt, so the
        // error is -0.5dt, decayed by speed 30 over half a tick.
        let expected_error = -0.5 * DT * 0.75;
        assert!((mover.prediction_error().x - expected_error).abs() < 1.0e-4);

        let plain_lerp = 4.0 * DT;
        let target = mover.render_state().target_position.x;
        assert!((target - (plain_lerp + expected_error)).abs() < 2.0e-4);
    }

    #[test]
    fn prediction_error_ignores_teleport_sized_jumps() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let knob = Rc::new(Cell::new(1.0));
        let mut processors = vec![ConstantVelocity::boxed(&knob, Vector::new(1.0, 0.0, 0.0))];

        mover.move_predicted(&mut scene, &mut processors, 1, 1, DT);
        mover.move_interpolated(&mut scene, &mut processors, 1, 0.5, DT);
        mover.move_predicted(&mut scene, &mut processors, 2, 2, DT);
        mover.move_interpolated(&mut scene, &mut processors, 2, 0.5, DT);

        // A resimulation that lands more than the teleport threshold away
        // resets the error to zero instead of smoothing across it.
        assert!(mover.restore_history(&mut scene, 1));
        knob.set(150.0);
        mover.move_predicted(&mut scene, &mut processors, 3, 2, DT);
        mover.move_predicted(&mut scene, &mut processors, 4, 3, DT);
        mover.move_interpolated(&mut scene, &mut processors, 4, 0.5, DT);

        assert_eq!(mover.prediction_error(), Vector::zeros());

        let plain_lerp = 226.0 * DT;
        assert!((mover.render_state().target_position.x - plain_lerp).abs() < 1.0e-3);
    }

    #[test]
    fn look_interpolation_wraps_yaw() {
        let mut scene = Scene::new();
        let mut mover = spawn(&mut scene, Vector::zeros());
        let mut processors: Vec<Box<dyn MoverProcessor>> = Vec::new();

        mover.set_look(10.0, 170.0);
        mover.move_predicted(&mut scene, &mut processors, 1, 1, DT);
        mover.set_look(10.0, -170.0);
        mover.move_predicted(&mut scene, &mut processors, 2, 2, DT);
        mover.move_interpolated(&mut scene, &mut processors, 2, 0.5, DT);

        assert!((mover.render_state().look_pitch() - 10.0).abs() < 1.0e-3);
        assert!((mover.render_state().look_yaw().abs() - 180.0).abs() < 1.0e-3);

        // Forcing the predicted look keeps the fixed-tick rotation.
        mover.settings_mut().force_predicted_look_rotation = true;
        mover.move_predicted(&mut scene, &mut processors, 3, 3, DT);
        mover.move_interpolated(&mut scene, &mut processors, 3, 0.5, DT);
        assert!((mover.render_state().look_yaw() + 170.0).abs() < 1.0e-3);
    }

    #[test]
    fn ray_cast_reports_sorted_hits() {
        let (mut scene, floor) = floor_scene();
        let mover = spawn(&mut scene, Vector::new(0.0, 2.0, 0.0));
        scene.refresh_queries();

        let mut sweep = SweepInfo::default();
        mover.ray_cast(
            &scene,
            &mut sweep,
            Vector::new(0.0, 2.0, 0.0),
            Vector::new(0.0, -1.0, 0.0),
            10.0,
            TriggerInteraction::Ignore,
        );

        assert_eq!(sweep.all_hits()[0].collider, floor);
        assert!((sweep.all_hits()[0].distance - 1.5).abs() < 1.0e-4);
    }

    #[test]
    fn query_only_actor_drops_its_collider() {
        let (mut scene, _floor) = floor_scene();
        let mut mover = spawn(&mut scene, Vector::new(0.0, 1.0, 0.0));
        let mut processors: Vec<Box<dyn MoverProcessor>> = vec![Box::new(GravityDrop)];

        let collider = mover.collider().unwrap();
        mover.set_shape(&mut scene, ActorShape::None);

        assert!(mover.collider().is_none());
        assert!(scene.profile(collider).is_none());

        // Without a collider the steps skip depenetration and the actor
        // falls through the floor.
        for tick in 1..=40 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
        }
        assert!(mover.fixed_state().target_position.y < 0.4);
        assert!(!mover.fixed_state().is_grounded);
    }

    #[test]
    fn reset_clears_state_and_history() {
        let mut scene = Scene::new();
        scene.insert_actor(Vector::new(0.2, 0.0, 0.0), RADIUS, HEIGHT, 1, 42);
        let mut mover = spawn(&mut scene, Vector::zeros());

        let events = Rc::new(RefCell::new(Vec::new()));
        let mut processors: Vec<Box<dyn MoverProcessor>> = vec![Box::new(HookRecorder {
            events: Rc::clone(&events),
        })];

        // Standing inside the other actor tracks it immediately.
        mover.move_predicted(&mut scene, &mut processors, 1, 1, DT);
        assert!(mover.fixed_state().collisions.has_actor(42));

        mover.reset(&mut processors);

        assert!(mover.fixed_state().collisions.entries().is_empty());
        assert!(mover.history_state(1).is_none());
        assert_eq!(events.borrow().last(), Some(&(false, 42)));
        assert!(!mover.trace().is_enabled());
    }
}
