//! Ground snapping: pulls the mover down after it loses the ground.

use character_solver::{MoverProcessor, ProcessorGroup, StageContext};
use collision_cache::{OverlapInfo, TriggerInteraction};
use rapier3d::math::Vector;
use rapier3d::prelude::Real;

/// Snaps the mover down after losing the grounded state, so walking over
/// convex edges and small drops never turns into a short flight.
///
/// Activates only when the ground was just lost without a jump or an active
/// step-up, and only while nothing pushes the mover upwards. The probe moves
/// a widened capsule down in penetration-resolved sub-steps of a quarter
/// radius; finding ground snaps the position toward it at `snap_speed`,
/// halved on the first activation to ease in.
pub struct GroundSnapProcessor {
    /// Maximum distance the mover is pulled down, in meters. Zero or
    /// negative disables the processor.
    pub snap_distance: Real,
    /// Snapping speed, in meters per second.
    pub snap_speed: Real,
    /// Refresh tracked hits whenever the snap moved the mover.
    pub force_update_hits: bool,

    overlap: OverlapInfo,
}

impl GroundSnapProcessor {
    pub const PRIORITY: i32 = -2000;
}

impl Default for GroundSnapProcessor {
    fn default() -> Self {
        Self {
            snap_distance: 0.25,
            snap_speed: 4.0,
            force_update_hits: false,
            overlap: OverlapInfo::default(),
        }
    }
}

impl MoverProcessor for GroundSnapProcessor {
    fn name(&self) -> &'static str {
        "GroundSnap"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn group(&self) -> ProcessorGroup {
        ProcessorGroup::GroundSnap
    }

    fn after_move_step(&mut self, ctx: &mut StageContext<'_>) {
        if self.snap_distance <= 0.0 {
            return;
        }

        if ctx.state.is_grounded
            || !ctx.state.was_grounded
            || ctx.state.jump_frames > 0
            || ctx.state.is_stepping_up
            || ctx.state.was_stepping_up
        {
            return;
        }

        // Something is pushing the mover up; let it fly.
        if ctx.state.dynamic_velocity.y > 0.0 {
            return;
        }

        // Probing the full snap distance at once would misclassify the
        // contact, so the downward movement is split into sub-steps of a
        // quarter radius at most.
        let max_step_delta = ctx.settings.radius * 0.25;
        let penetration_steps = (self.snap_distance / max_step_delta).ceil().max(1.0) as u32;
        let penetration_delta = self.snap_distance / penetration_steps as Real;
        let overlap_radius = ctx.settings.radius * 1.5;

        // One widened overlap covers the whole downward path.
        ctx.capsule_overlap(
            &mut self.overlap,
            ctx.state.target_position - Vector::new(0.0, self.snap_distance, 0.0),
            overlap_radius,
            ctx.settings.height + self.snap_distance,
            0.0,
            TriggerInteraction::Ignore,
        );
        if self.overlap.hit_count() == 0 {
            return;
        }

        let mut grounded_position = ctx.state.target_position;
        let step_delta = Vector::new(0.0, -penetration_delta, 0.0);

        for _ in 0..penetration_steps {
            grounded_position = ctx.resolve_penetration(
                &mut self.overlap,
                grounded_position,
                grounded_position + step_delta,
                false,
                0,
                0,
                false,
            );

            if ctx.state.is_grounded {
                // Ground found; approach it at the snap speed.
                let mut max_snap_delta = self.snap_speed * ctx.state.update_delta_time;
                if !ctx.state.was_snapping_to_ground {
                    // Ease into the first snap.
                    max_snap_delta *= 0.5;
                }

                let position_offset = grounded_position - ctx.state.target_position;
                let snapped_position =
                    if position_offset.norm_squared() <= max_snap_delta * max_snap_delta {
                        grounded_position
                    } else {
                        ctx.state.target_position
                            + position_offset / position_offset.norm() * max_snap_delta
                    };

                ctx.state.target_position = snapped_position;
                ctx.state.ground_distance = (snapped_position.y - grounded_position.y).max(0.0);
                ctx.state.is_snapping_to_ground = true;

                if self.force_update_hits {
                    ctx.request_hit_refresh(true);
                }

                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnvironmentProcessor;
    use character_solver::Mover;
    use mover_state::MoverSettings;
    use rapier3d::prelude::{ColliderBuilder, Isometry};
    use scene_rapier::{layer_groups, Scene};

    const DT: Real = 1.0 / 60.0;

    /// Upper floor for x < 0 with its top at 0, lower floor for x > 0 with
    /// its top at `-drop`.
    fn scene_with_drop(drop: Real) -> Scene {
        let mut scene = Scene::new();
        scene.insert_static_collider(
            ColliderBuilder::cuboid(5.0, 0.5, 10.0)
                .position(Isometry::translation(-5.0, -0.5, 0.0))
                .collision_groups(layer_groups(1))
                .build(),
        );
        scene.insert_static_collider(
            ColliderBuilder::cuboid(20.0, 0.5, 10.0)
                .position(Isometry::translation(20.0, -0.5 - drop, 0.0))
                .collision_groups(layer_groups(1))
                .build(),
        );
        scene
    }

    fn spawn(scene: &mut Scene, position: Vector<Real>) -> Mover {
        let settings = MoverSettings::default();
        let (body, collider) = scene.insert_actor(
            position,
            settings.radius,
            settings.height,
            settings.collider_layer,
            1,
        );
        Mover::new(settings, 1, body, Some(collider), position)
    }

    fn run(mover: &mut Mover, scene: &mut Scene, processors: &mut Vec<Box<dyn MoverProcessor>>) -> bool {
        mover.set_input_direction(Vector::new(1.0, 0.0, 0.0));
        let mut snapped = false;
        for tick in 1..=240 {
            mover.move_predicted(scene, processors, tick as u64, tick, DT);
            snapped |= mover.fixed_state().is_snapping_to_ground;
        }
        snapped
    }

    #[test]
    fn small_drop_snaps_instead_of_flying() {
        let mut scene = scene_with_drop(0.15);
        let mut mover = spawn(&mut scene, Vector::new(-2.0, 0.0, 0.0));
        let mut processors: Vec<Box<dyn MoverProcessor>> = vec![
            Box::new(EnvironmentProcessor::default()),
            Box::new(GroundSnapProcessor::default()),
        ];

        let snapped = run(&mut mover, &mut scene, &mut processors);

        let state = mover.fixed_state();
        assert!(snapped, "snapping never activated");
        assert!(state.is_grounded);
        assert!((state.target_position.y + 0.15).abs() < 0.02);
    }

    #[test]
    fn deep_drop_is_out_of_snap_range() {
        let mut scene = scene_with_drop(1.5);
        let mut mover = spawn(&mut scene, Vector::new(-2.0, 0.0, 0.0));
        let mut processors: Vec<Box<dyn MoverProcessor>> = vec![
            Box::new(EnvironmentProcessor::default()),
            Box::new(GroundSnapProcessor::default()),
        ];

        let snapped = run(&mut mover, &mut scene, &mut processors);

        // Past the edge the probe finds nothing within 0.25 m; the mover
        // falls under gravity and lands on the lower floor.
        assert!(!snapped);
        assert!(mover.fixed_state().is_grounded);
        assert!((mover.fixed_state().target_position.y + 1.5).abs() < 0.02);
    }

    #[test]
    fn upward_velocity_disables_snapping() {
        let mut scene = scene_with_drop(0.15);
        let mut mover = spawn(&mut scene, Vector::new(-0.6, 0.0, 0.0));
        let mut processors: Vec<Box<dyn MoverProcessor>> = vec![
            Box::new(EnvironmentProcessor::default()),
            Box::new(GroundSnapProcessor::default()),
        ];

        for tick in 1..=10 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
        }

        mover.set_input_direction(Vector::new(1.0, 0.0, 0.0));
        mover.jump(Vector::new(0.0, 5.0, 0.0));
        let mut snapped = false;
        for tick in 11..=20 {
            mover.move_predicted(&mut scene, &mut processors, tick as u64, tick, DT);
            snapped |= mover.fixed_state().is_snapping_to_ground;
        }

        assert!(!snapped);
        assert!(mover.fixed_state().target_position.y > 0.2);
    }
}
