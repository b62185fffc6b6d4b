//! Step detection: blocked horizontal movement is reflected upwards.

use character_solver::{MoverProcessor, ProcessorGroup, StageContext};
use collision_cache::{CollisionType, OverlapInfo, SweepInfo, TriggerInteraction};
use mover_math::VectorExt;
use mover_state::MoverState;
use rapier3d::math::Vector;
use rapier3d::prelude::Real;
use solver_core::logging;

/// Lifts the mover onto low obstacles that block its horizontal movement.
///
/// A step attempt starts when the resolved step either touched Slope, Wall or
/// Hang geometry within the extent, or traveled less than `min_push_back` of
/// the desired distance. The candidate position above the obstacle is then
/// validated with an upward and a forward capsule overlap plus a downward
/// sphere sweep for the step surface, and the unapplied movement is projected
/// into +Y. The mover counts as grounded while stepping.
pub struct StepUpProcessor {
    /// Maximum obstacle height to step onto, in meters. Zero or negative
    /// disables the processor.
    pub step_height: Real,
    /// Forward reach of the step probe, in meters.
    pub step_depth: Real,
    /// Multiplier on the unapplied movement projected upwards.
    pub step_speed: Real,
    /// Minimum proportional push-back to trigger the distance heuristic; 0.5
    /// means the resolved step lost at least half the desired movement.
    pub min_push_back: Real,
    /// Radius scale of the downward surface sweep. Smaller values read edge
    /// normals better with short step depths.
    pub ground_check_radius_scale: Real,
    /// Drop the dynamic velocity when the step ends, so jumps and pushes do
    /// not bump the mover off the edge.
    pub clear_dynamic_velocity_on_end: bool,
    /// Start a step only onto surfaces flatter than the walkable angle.
    pub require_ground_target: bool,
    /// Refresh tracked hits whenever the step moved the mover.
    pub force_update_hits: bool,

    overlap: OverlapInfo,
    sweep: SweepInfo,
}

impl StepUpProcessor {
    pub const PRIORITY: i32 = -1000;
}

impl Default for StepUpProcessor {
    fn default() -> Self {
        Self {
            step_height: 0.5,
            step_depth: 0.2,
            step_speed: 1.0,
            min_push_back: 0.5,
            ground_check_radius_scale: 0.5,
            clear_dynamic_velocity_on_end: true,
            require_ground_target: false,
            force_update_hits: false,
            overlap: OverlapInfo::default(),
            sweep: SweepInfo::default(),
        }
    }
}

impl MoverProcessor for StepUpProcessor {
    fn name(&self) -> &'static str {
        "StepUp"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn group(&self) -> ProcessorGroup {
        ProcessorGroup::StepUp
    }

    fn after_move_step(&mut self, ctx: &mut StageContext<'_>) {
        if self.step_height <= 0.0 {
            return;
        }

        // Never step right after a jump or a teleport.
        if ctx.state.jump_frames > 0 || ctx.state.has_teleported {
            self.finish(ctx.state, false);
            return;
        }

        let mut try_step_up = has_collisions_within_extent(
            ctx.step_overlap,
            CollisionType::Slope.bits() | CollisionType::Wall.bits() | CollisionType::Hang.bits(),
        );

        if !try_step_up {
            // Distance heuristic: something pushed the mover back by more
            // than the allowed fraction of the desired movement.
            let desired_distance = (ctx.state.desired_position - ctx.state.base_position).norm();
            if desired_distance > 0.001 {
                let traveled_distance =
                    (ctx.state.target_position - ctx.state.base_position).norm();
                if traveled_distance / desired_distance < self.min_push_back {
                    try_step_up = true;
                }
            }
        }

        if !try_step_up {
            self.finish(ctx.state, false);
            return;
        }

        let base_position = ctx.state.base_position;
        let desired_position = ctx.state.desired_position;
        let mut target_position = ctx.state.target_position;

        let desired_delta = desired_position - base_position;
        let desired_direction = match desired_delta.try_normalize(1.0e-6) {
            Some(direction) => direction,
            None => {
                // No pending movement, nothing to reflect upwards.
                self.finish(ctx.state, false);
                return;
            }
        };

        // Moving (almost) straight down never steps.
        if desired_direction.y <= -0.9 {
            self.finish(ctx.state, false);
            return;
        }

        let correction_delta = target_position - desired_position;
        let correction_distance = correction_delta.norm();
        let correction_direction = if correction_distance > 0.001 {
            correction_delta / correction_distance
        } else {
            -desired_direction
        };

        // The correction must oppose the desired movement.
        if desired_direction.dot(&correction_direction) >= 0.0 {
            self.finish(ctx.state, false);
            return;
        }

        let desired_direction_xz = desired_direction
            .only_xz()
            .try_normalize(1.0e-6)
            .unwrap_or_else(Vector::zeros);
        let correction_direction_xz = (-correction_direction.only_xz())
            .try_normalize(1.0e-6)
            .unwrap_or_else(Vector::zeros);

        // Horizontally the two directions must roughly agree as well.
        if desired_direction_xz.dot(&correction_direction_xz) < 0.1 {
            self.finish(ctx.state, false);
            return;
        }

        let combined_direction_xz = (desired_direction_xz + correction_direction_xz)
            .try_normalize(1.0e-6)
            .unwrap_or_else(Vector::zeros);

        // Recompute the step base from the impact point: intersect the
        // pre-impact movement ray with the contact plane. This stops the
        // mover from stepping while sliding along the obstacle.
        if !has_collisions_within_extent(ctx.step_overlap, CollisionType::Slope.bits()) {
            let ray_origin = base_position - desired_delta * 2.0;
            let denominator = desired_direction.dot(&correction_direction);
            if denominator.abs() > 1.0e-6 {
                let distance =
                    (target_position - ray_origin).dot(&correction_direction) / denominator;
                if distance > 0.0 {
                    target_position = ray_origin + desired_direction * distance;
                }
            }
        }

        let mut check_radius = ctx.settings.radius - ctx.settings.extent;
        let mut check_position = target_position + Vector::new(0.0, self.step_height, 0.0);
        let capsule_height = ctx.settings.height;

        // Upward probe: room above the obstacle.
        ctx.capsule_overlap(
            &mut self.overlap,
            check_position,
            check_radius,
            capsule_height,
            0.0,
            TriggerInteraction::Ignore,
        );
        if self.overlap.hit_count() > 0 {
            self.finish(ctx.state, false);
            return;
        }

        // Forward probe, along the combined direction so the mover does not
        // step up diagonally along the obstacle surface.
        check_position += combined_direction_xz * self.step_depth;
        ctx.capsule_overlap(
            &mut self.overlap,
            check_position,
            check_radius,
            capsule_height,
            0.0,
            TriggerInteraction::Ignore,
        );
        if self.overlap.hit_count() > 0 {
            self.finish(ctx.state, false);
            return;
        }

        if self.ground_check_radius_scale < 1.0 {
            // A smaller sweep radius compensates the edge normals.
            check_radius = ctx.settings.radius * self.ground_check_radius_scale;
            check_position +=
                combined_direction_xz * (ctx.settings.radius - ctx.settings.extent - check_radius);
        }

        // Downward sweep for the step surface.
        let mut max_step_height = self.step_height;
        let mut surface_found = false;
        let mut surface_normal = Vector::zeros();

        ctx.sphere_sweep(
            &mut self.sweep,
            check_position + Vector::new(0.0, ctx.settings.radius, 0.0),
            check_radius,
            -Vector::y(),
            max_step_height + ctx.settings.radius,
            TriggerInteraction::Ignore,
        );

        let mut highest_point_y = Real::MIN;
        for hit in self.sweep.collider_hits() {
            if hit.point.y > target_position.y && hit.point.y > highest_point_y {
                highest_point_y = hit.point.y;
                surface_normal = hit.normal;
                surface_found = true;
            }
        }
        if surface_found {
            max_step_height = (highest_point_y - target_position.y).clamp(0.0, self.step_height);
        }

        // The first attempt optionally requires a walkable target surface.
        if self.require_ground_target
            && !ctx.state.is_stepping_up
            && !ctx.state.was_stepping_up
            && surface_found
        {
            let min_ground_dot = ctx
                .state
                .max_ground_angle
                .clamp(0.0, 90.0)
                .to_radians()
                .cos();
            if surface_normal.y < min_ground_dot {
                self.finish(ctx.state, false);
                return;
            }
        }

        // Project the unapplied movement into +Y, scaled by how directly the
        // obstacle opposes the movement.
        let desired_distance = (desired_position - base_position).norm();
        let traveled_distance = (target_position - base_position).norm();
        let mut remaining_distance =
            ((desired_distance - traveled_distance) * self.step_speed).clamp(0.0, max_step_height);
        remaining_distance *= desired_direction.dot(&-correction_direction).clamp(0.0, 1.0);

        let state = &mut *ctx.state;
        state.target_position = target_position + Vector::new(0.0, remaining_distance, 0.0);

        // The mover stays grounded while stepping.
        state.is_grounded = true;
        state.ground_normal = Vector::y();
        state.ground_distance = ctx.settings.extent;
        state.ground_position = state.target_position;
        state.ground_tangent = state.transform_direction();

        if self.force_update_hits {
            ctx.request_hit_refresh(true);
        }

        self.finish(ctx.state, true);
    }
}

impl StepUpProcessor {
    fn finish(&self, state: &mut MoverState, is_stepping_up: bool) {
        state.is_stepping_up = is_stepping_up;

        if is_stepping_up && !state.was_stepping_up {
            logging::trace("step-up begin");
        } else if !is_stepping_up && state.was_stepping_up {
            if self.clear_dynamic_velocity_on_end {
                // Keeps jump and push momentum from bumping over the edge.
                state.dynamic_velocity = Vector::zeros();
            }
            logging::trace("step-up end");
        }
    }
}

fn has_collisions_within_extent(overlap: &OverlapInfo, collision_types: u32) -> bool {
    overlap
        .collider_hits()
        .any(|hit| hit.is_within_extent && hit.collision_type.bits() & collision_types != 0)
}
