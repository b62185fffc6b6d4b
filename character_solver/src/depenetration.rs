//! Penetration resolution against the colliders collected by an overlap
//! query, plus the ground probing that runs with it.
//!
//! A single overlapping collider is resolved directly from its penetration
//! vector. Multiple colliders feed a [`CorrectionResolver`] and get resolved
//! over a few passes, applying the full correction only in the last one.
//! Every pass classifies the contacted surfaces and accumulates the ground
//! state into the mover.

use collision_cache::{CollisionBands, CollisionType, OverlapHit, OverlapInfo, SceneQuery};
use mover_math::{
    project_horizontal_penetration, project_on_ground, project_vertical_penetration, VectorExt,
};
use mover_state::{MoverSettings, MoverState};
use rapier3d::math::Vector;
use rapier3d::prelude::Real;

use crate::resolver::CorrectionResolver;

/// Sub-step length below which position deltas are resolved in one pass.
const MIN_STEP_DISTANCE: Real = 0.001;

/// Sentinel marking a hit whose up-dot has not been measured this pass.
const UP_DOT_UNSET: Real = Real::MIN;

/// Depenetrates `target_position` from every collider hit in `overlap` and
/// refreshes the grounding state. Trigger hits are classified without
/// affecting the returned position.
///
/// `max_steps` above one splits the `base_position` to `target_position`
/// delta into sub-steps resolved one at a time; `resolver_iterations` adds
/// extra passes when several colliders overlap at once.
#[allow(clippy::too_many_arguments)]
pub fn resolve_penetration(
    scene: &mut dyn SceneQuery,
    settings: &MoverSettings,
    resolver: &mut CorrectionResolver,
    overlap: &mut OverlapInfo,
    state: &mut MoverState,
    base_position: Vector<Real>,
    mut target_position: Vector<Real>,
    probe_grounding: bool,
    max_steps: u32,
    resolver_iterations: u32,
    resolve_triggers: bool,
) -> Vector<Real> {
    if settings.suppress_convex_mesh_colliders {
        overlap.toggle_convex_mesh_colliders(scene, false);
    }

    let collider_hit_count = overlap.collider_indices().len();
    if collider_hit_count == 1 {
        target_position = depenetrate_single(
            &*scene,
            settings,
            overlap,
            state,
            base_position,
            target_position,
            probe_grounding,
            max_steps,
        );
    } else if collider_hit_count > 1 {
        target_position = depenetrate_multiple(
            &*scene,
            settings,
            resolver,
            overlap,
            state,
            base_position,
            target_position,
            probe_grounding,
            max_steps,
            resolver_iterations,
        );
    }

    recalculate_ground_properties(state);

    if resolve_triggers {
        for slot in 0..overlap.trigger_indices().len() {
            let index = overlap.trigger_indices()[slot];
            let hit = &mut overlap.all_hits_mut()[index];

            let penetration = scene.compute_penetration(
                hit.collider,
                &state.target_position,
                settings.radius,
                settings.height,
                0.0,
            );

            hit.has_penetration = penetration.is_some();
            hit.is_within_extent = penetration.is_some();
            hit.collision_type = match penetration {
                Some(_) => CollisionType::Trigger,
                None => CollisionType::None,
            };

            if let Some(penetration) = penetration {
                if penetration.depth > hit.max_penetration {
                    hit.max_penetration = penetration.depth;
                }
            }
        }
    }

    if settings.suppress_convex_mesh_colliders {
        overlap.toggle_convex_mesh_colliders(scene, true);
    }

    target_position
}

/// Classifies a measured penetration into the hit and the mover state, then
/// returns the correction to apply, redirected into the XZ plane when the
/// mover pushes against a too-steep surface while not moving upwards.
///
/// Returns the correction direction and distance plus the up-dot when this
/// probe classified the hit as ground.
fn classify_penetration(
    hit: &mut OverlapHit,
    state: &mut MoverState,
    bands: &CollisionBands,
    mut direction: Vector<Real>,
    mut distance: Real,
    movement_xz: &Vector<Real>,
) -> (Vector<Real>, Real, Option<Real>) {
    hit.is_within_extent = true;

    if distance > hit.max_penetration {
        hit.max_penetration = distance;
    }

    let mut ground_up_dot = None;

    let direction_up_dot = direction.y;
    if direction_up_dot > hit.up_direction_dot {
        hit.up_direction_dot = direction_up_dot;
        hit.collision_type = bands.classify(direction_up_dot);

        if hit.collision_type == CollisionType::Ground {
            state.is_grounded = true;
            ground_up_dot = Some(direction_up_dot);
        }
    }

    // Pushing into a surface too steep to stand on while falling redirects
    // the correction sideways so the mover slides off instead of riding up.
    if direction_up_dot > 0.0
        && direction_up_dot < bands.min_ground_dot
        && distance >= 0.000001
        && state.dynamic_velocity.y <= 0.0
        && movement_xz.dot(&direction.only_xz()) < 0.0
    {
        project_vertical_penetration(&mut direction, &mut distance);
    }

    (direction, distance, ground_up_dot)
}

fn reduce_max_steps(base_position: &Vector<Real>, target_position: &Vector<Real>, max_steps: u32) -> u32 {
    if max_steps <= 1 {
        return max_steps;
    }

    let target_distance = (target_position - base_position).norm();
    if target_distance < max_steps as Real * MIN_STEP_DISTANCE {
        return ((target_distance / MIN_STEP_DISTANCE) as u32).max(1);
    }

    max_steps
}

#[allow(clippy::too_many_arguments)]
fn depenetrate_single(
    scene: &dyn SceneQuery,
    settings: &MoverSettings,
    overlap: &mut OverlapInfo,
    state: &mut MoverState,
    base_position: Vector<Real>,
    mut target_position: Vector<Real>,
    probe_grounding: bool,
    max_steps: u32,
) -> Vector<Real> {
    let bands = CollisionBands::new(
        state.max_ground_angle,
        state.max_wall_angle,
        state.max_hang_angle,
    );
    let mut ground_normal = Vector::y();
    let mut ground_distance: Real = 0.0;

    let index = overlap.collider_indices()[0];
    overlap.all_hits_mut()[index].up_direction_dot = UP_DOT_UNSET;

    let max_steps = reduce_max_steps(&base_position, &target_position, max_steps);

    if max_steps <= 1 {
        let hit = &mut overlap.all_hits_mut()[index];
        let penetration = scene.compute_penetration(
            hit.collider,
            &target_position,
            settings.radius,
            settings.height,
            0.0,
        );

        hit.has_penetration = penetration.is_some();
        if let Some(penetration) = penetration {
            let movement_xz = (target_position - base_position).only_xz();
            let (direction, distance, ground_up_dot) = classify_penetration(
                hit,
                state,
                &bands,
                penetration.direction,
                penetration.depth,
                &movement_xz,
            );

            if ground_up_dot.is_some() {
                ground_normal = direction;
            }

            target_position += direction * distance;
        }
    } else {
        let step_delta = (target_position - base_position) / max_steps as Real;
        let step_delta_xz = step_delta.only_xz();
        let mut desired_position = base_position;
        let mut remaining_steps = max_steps;

        while remaining_steps > 0 {
            remaining_steps -= 1;

            desired_position += step_delta;

            let hit = &mut overlap.all_hits_mut()[index];
            let penetration = scene.compute_penetration(
                hit.collider,
                &desired_position,
                settings.radius,
                settings.height,
                0.0,
            );

            hit.has_penetration = penetration.is_some();
            let Some(penetration) = penetration else {
                continue;
            };

            let (direction, distance, ground_up_dot) = classify_penetration(
                hit,
                state,
                &bands,
                penetration.direction,
                penetration.depth,
                &step_delta_xz,
            );

            if ground_up_dot.is_some() {
                ground_normal = direction;
            }

            desired_position += direction * distance;
        }

        target_position = desired_position;
    }

    let hit = &mut overlap.all_hits_mut()[index];
    if hit.up_direction_dot == UP_DOT_UNSET {
        hit.up_direction_dot = 0.0;
    }

    if probe_grounding && !state.is_grounded {
        let hit = &mut overlap.all_hits_mut()[index];
        let probe = check_ground(
            scene,
            hit,
            &target_position,
            settings.radius,
            settings.height,
            settings.extent,
            bands.min_ground_dot,
        );

        if probe.is_grounded {
            state.is_grounded = true;

            ground_normal = probe.normal;
            ground_distance = probe.distance;

            hit.is_within_extent = true;
            hit.collision_type = CollisionType::Ground;
        } else if probe.is_within_extent {
            hit.is_within_extent = true;

            if hit.collision_type == CollisionType::None {
                hit.collision_type = CollisionType::Slope;
            }
        }
    }

    if state.is_grounded {
        state.ground_normal = ground_normal;
        state.ground_angle = ground_normal.y.clamp(-1.0, 1.0).acos().to_degrees();
        state.ground_position = target_position + Vector::new(0.0, settings.radius, 0.0)
            - ground_normal * (settings.radius + ground_distance);
        state.ground_distance = ground_distance;
    }

    target_position
}

#[allow(clippy::too_many_arguments)]
fn depenetrate_multiple(
    scene: &dyn SceneQuery,
    settings: &MoverSettings,
    resolver: &mut CorrectionResolver,
    overlap: &mut OverlapInfo,
    state: &mut MoverState,
    base_position: Vector<Real>,
    mut target_position: Vector<Real>,
    probe_grounding: bool,
    max_steps: u32,
    resolver_iterations: u32,
) -> Vector<Real> {
    let bands = CollisionBands::new(
        state.max_ground_angle,
        state.max_wall_angle,
        state.max_hang_angle,
    );
    let mut ground_distance: Real = 0.0;
    let position_delta_xz = (target_position - base_position).only_xz();

    let collider_hit_count = overlap.collider_indices().len();
    for slot in 0..collider_hit_count {
        let index = overlap.collider_indices()[slot];
        overlap.all_hits_mut()[index].up_direction_dot = UP_DOT_UNSET;
    }

    let mut ground = GroundAccumulator {
        max_dot: 0.0,
        max_normal: Vector::zeros(),
        average_normal: Vector::zeros(),
    };

    let max_steps = reduce_max_steps(&base_position, &target_position, max_steps);

    if max_steps <= 1 {
        probe_all_hits(
            scene,
            settings,
            &bands,
            overlap,
            state,
            resolver,
            &target_position,
            &position_delta_xz,
            true,
            &mut ground,
        );

        let mut remaining_sub_steps = resolver_iterations;

        // Early passes apply a fraction of the correction; the later passes
        // finish the job against the re-probed contacts.
        let multiplier = 1.0 - remaining_sub_steps.min(2) as Real * 0.25;

        if resolver.size() == 2 {
            let direction0 = resolver.direction(0);
            let direction1 = resolver.direction(1);

            if direction0.dot(&direction1) >= 0.0 {
                target_position += resolver.calculate_min_max() * multiplier;
            } else {
                target_position += resolver.calculate_binary() * multiplier;
            }
        } else {
            target_position += resolver.calculate_gradient_descent(12, 0.0001) * multiplier;
        }

        while remaining_sub_steps > 0 {
            remaining_sub_steps -= 1;

            probe_all_hits(
                scene,
                settings,
                &bands,
                overlap,
                state,
                resolver,
                &target_position,
                &position_delta_xz,
                false,
                &mut ground,
            );

            if resolver.size() == 0 {
                break;
            }

            if remaining_sub_steps == 0 {
                if resolver.size() == 2 {
                    let direction0 = resolver.direction(0);
                    let direction1 = resolver.direction(1);

                    if direction0.dot(&direction1) >= 0.0 {
                        target_position += resolver.calculate_gradient_descent(12, 0.0001);
                    } else {
                        target_position += resolver.calculate_binary();
                    }
                } else {
                    target_position += resolver.calculate_gradient_descent(12, 0.0001);
                }
            } else if remaining_sub_steps == 1 {
                target_position += resolver.calculate_min_max() * 0.75;
            } else {
                target_position += resolver.calculate_min_max() * 0.5;
            }
        }
    } else {
        let step_delta = (target_position - base_position) / max_steps as Real;
        let step_delta_xz = step_delta.only_xz();
        let mut desired_position = base_position;
        let mut remaining_steps = max_steps;

        while remaining_steps > 1 {
            remaining_steps -= 1;

            desired_position += step_delta;

            probe_all_hits(
                scene,
                settings,
                &bands,
                overlap,
                state,
                resolver,
                &desired_position,
                &step_delta_xz,
                true,
                &mut ground,
            );

            if resolver.size() == 2 {
                let direction0 = resolver.direction(0);
                let direction1 = resolver.direction(1);

                if direction0.dot(&direction1) >= 0.0 {
                    desired_position += resolver.calculate_min_max();
                } else {
                    desired_position += resolver.calculate_binary();
                }
            } else {
                desired_position += resolver.calculate_min_max();
            }
        }

        desired_position += step_delta;

        probe_all_hits(
            scene,
            settings,
            &bands,
            overlap,
            state,
            resolver,
            &desired_position,
            &step_delta_xz,
            true,
            &mut ground,
        );

        if resolver.size() == 2 {
            let direction0 = resolver.direction(0);
            let direction1 = resolver.direction(1);

            if direction0.dot(&direction1) >= 0.0 {
                desired_position += resolver.calculate_min_max();
            } else {
                desired_position += resolver.calculate_binary();
            }
        } else {
            desired_position += resolver.calculate_gradient_descent(12, 0.0001);
        }

        target_position = desired_position;
    }

    for slot in 0..collider_hit_count {
        let index = overlap.collider_indices()[slot];
        let hit = &mut overlap.all_hits_mut()[index];
        if hit.up_direction_dot == UP_DOT_UNSET {
            hit.up_direction_dot = 0.0;
        }
    }

    if probe_grounding && !state.is_grounded {
        let mut closest_ground_normal = Vector::y();
        let mut closest_ground_distance: Real = 1000.0;

        for slot in 0..collider_hit_count {
            let index = overlap.collider_indices()[slot];
            let hit = &mut overlap.all_hits_mut()[index];

            let probe = check_ground(
                scene,
                hit,
                &target_position,
                settings.radius,
                settings.height,
                settings.extent,
                bands.min_ground_dot,
            );

            if probe.is_grounded {
                state.is_grounded = true;

                if probe.distance < closest_ground_distance {
                    closest_ground_normal = probe.normal;
                    closest_ground_distance = probe.distance;
                }

                hit.is_within_extent = true;
                hit.collision_type = CollisionType::Ground;
            } else if probe.is_within_extent {
                hit.is_within_extent = true;

                if hit.collision_type == CollisionType::None {
                    hit.collision_type = CollisionType::Slope;
                }
            }
        }

        if state.is_grounded {
            ground.max_normal = closest_ground_normal;
            ground.average_normal = closest_ground_normal;
            ground_distance = closest_ground_distance;
        }
    }

    if state.is_grounded {
        // A lone ground contact keeps its exact normal; several average out.
        if ground.average_normal != ground.max_normal {
            ground.average_normal = ground
                .average_normal
                .try_normalize(1.0e-5)
                .unwrap_or_else(Vector::zeros);
        }

        state.ground_normal = ground.average_normal;
        state.ground_angle = ground.average_normal.y.clamp(-1.0, 1.0).acos().to_degrees();
        state.ground_position = target_position + Vector::new(0.0, settings.radius, 0.0)
            - state.ground_normal * (settings.radius + ground_distance);
        state.ground_distance = ground_distance;
    }

    target_position
}

/// Ground normals gathered across the probes of one multi-collider pass.
struct GroundAccumulator {
    max_dot: Real,
    max_normal: Vector<Real>,
    average_normal: Vector<Real>,
}

/// Probes every collider hit at `position`, feeding the corrections into the
/// resolver and the ground normals into the accumulator. `track_misses`
/// controls whether a probe without penetration clears the hit's flag.
#[allow(clippy::too_many_arguments)]
fn probe_all_hits(
    scene: &dyn SceneQuery,
    settings: &MoverSettings,
    bands: &CollisionBands,
    overlap: &mut OverlapInfo,
    state: &mut MoverState,
    resolver: &mut CorrectionResolver,
    position: &Vector<Real>,
    movement_xz: &Vector<Real>,
    track_misses: bool,
    ground: &mut GroundAccumulator,
) {
    resolver.reset();

    for slot in 0..overlap.collider_indices().len() {
        let index = overlap.collider_indices()[slot];
        let hit = &mut overlap.all_hits_mut()[index];

        let penetration = scene.compute_penetration(
            hit.collider,
            position,
            settings.radius,
            settings.height,
            0.0,
        );

        if track_misses {
            hit.has_penetration = penetration.is_some();
        }
        let Some(penetration) = penetration else {
            continue;
        };
        hit.has_penetration = true;

        let (direction, distance, ground_up_dot) = classify_penetration(
            hit,
            state,
            bands,
            penetration.direction,
            penetration.depth,
            movement_xz,
        );

        if let Some(up_dot) = ground_up_dot {
            if up_dot >= ground.max_dot {
                ground.max_dot = up_dot;
                ground.max_normal = direction;
            }

            ground.average_normal += direction * up_dot;
        }

        resolver.add_correction(direction, distance);
    }
}

/// Result of probing one collider for standable ground below the capsule.
struct GroundProbe {
    is_grounded: bool,
    normal: Vector<Real>,
    distance: Real,
    is_within_extent: bool,
}

/// Checks whether `hit` offers ground within `extent` below the capsule
/// standing at `position`.
///
/// Mesh and terrain colliders are probed with the capsule lowered by
/// `extent`; primitives use the closest point on their surface to the bottom
/// sphere center, which stays exact arbitrarily far away.
fn check_ground(
    scene: &dyn SceneQuery,
    hit: &OverlapHit,
    position: &Vector<Real>,
    radius: Real,
    height: Real,
    extent: Real,
    min_ground_dot: Real,
) -> GroundProbe {
    let mut probe = GroundProbe {
        is_grounded: false,
        normal: Vector::y(),
        distance: 0.0,
        is_within_extent: false,
    };

    if !hit.is_primitive {
        let lowered = position - Vector::new(0.0, extent, 0.0);
        if let Some(penetration) =
            scene.compute_penetration(hit.collider, &lowered, radius, height, 0.0)
        {
            probe.is_within_extent = true;

            let direction_up_dot = penetration.direction.y;
            if direction_up_dot >= min_ground_dot {
                let mut projected_direction = penetration.direction;
                let mut projected_distance = penetration.depth;

                project_horizontal_penetration(&mut projected_direction, &mut projected_distance);

                let vertical_distance = (extent - projected_distance).max(0.0);

                probe.is_grounded = true;
                probe.normal = penetration.direction;
                probe.distance = vertical_distance * direction_up_dot;
            }
        }
    } else {
        let radius_extent = radius + extent;
        let center = position + Vector::new(0.0, radius, 0.0);

        let Some(closest_point) = scene.closest_point(hit.collider, &center) else {
            return probe;
        };

        let offset = closest_point - center;
        let offset_xz = offset.only_xz();

        if offset_xz.norm_squared() <= radius_extent * radius_extent {
            if offset.y < 0.0 {
                let offset_distance = offset.norm();
                if offset_distance <= radius_extent {
                    probe.is_within_extent = true;

                    let normal = -offset / offset_distance;
                    if normal.y >= min_ground_dot {
                        probe.is_grounded = true;
                        probe.normal = normal;
                        probe.distance = (offset_distance - radius).max(0.0);
                    }
                }
            } else if offset.y < height - radius * 2.0 {
                probe.is_within_extent = true;
            }
        }
    }

    probe
}

/// Derives the ground tangent from the ground normal, falling back to the
/// desired movement direction and finally the facing direction when the
/// normal is vertical.
pub fn recalculate_ground_properties(state: &mut MoverState) {
    if !state.is_grounded {
        return;
    }

    if let Some(projected) = project_on_ground(state.ground_normal, state.ground_normal.only_xz())
    {
        state.ground_tangent = projected.try_normalize(1.0e-5).unwrap_or_else(Vector::zeros);
        return;
    }

    if let Some(projected) =
        project_on_ground(state.ground_normal, state.desired_velocity().only_xz())
    {
        state.ground_tangent = projected.try_normalize(1.0e-5).unwrap_or_else(Vector::zeros);
        return;
    }

    state.ground_tangent = state.transform_direction();
}

#[cfg(test)]
mod tests {
    use super::*;
    use collision_cache::TriggerInteraction;
    use rapier3d::prelude::*;
    use scene_rapier::{layer_groups, wedge_mesh, Scene};

    const RADIUS: Real = 0.35;
    const HEIGHT: Real = 1.8;

    fn test_settings() -> MoverSettings {
        MoverSettings::default()
    }

    fn test_state() -> MoverState {
        let mut state = MoverState::new();
        state.max_ground_angle = 60.0;
        state.max_wall_angle = 5.0;
        state.max_hang_angle = 30.0;
        state
    }

    fn insert_floor(scene: &mut Scene) -> ColliderHandle {
        scene.insert_static_collider(
            ColliderBuilder::cuboid(10.0, 0.5, 10.0)
                .position(Isometry::translation(0.0, -0.5, 0.0))
                .collision_groups(layer_groups(1))
                .build(),
        )
    }

    fn overlap_at(scene: &Scene, position: Vector<Real>, extent: Real) -> OverlapInfo {
        let mut info = OverlapInfo::default();
        info.set_query(position, RADIUS, HEIGHT, extent, 1, TriggerInteraction::Collide);
        scene.overlap_capsule(&mut info);
        info
    }

    fn resolve(
        scene: &mut Scene,
        overlap: &mut OverlapInfo,
        state: &mut MoverState,
        base: Vector<Real>,
        target: Vector<Real>,
        probe_grounding: bool,
    ) -> Vector<Real> {
        let settings = test_settings();
        let mut resolver = CorrectionResolver::default();
        state.target_position = target;
        resolve_penetration(
            scene,
            &settings,
            &mut resolver,
            overlap,
            state,
            base,
            target,
            probe_grounding,
            0,
            2,
            true,
        )
    }

    #[test]
    fn floor_penetration_pushes_up_and_grounds() {
        let mut scene = Scene::new();
        insert_floor(&mut scene);

        let target = Vector::new(0.0, -0.05, 0.0);
        let mut overlap = overlap_at(&scene, target, RADIUS);
        assert_eq!(overlap.collider_indices().len(), 1);

        let mut state = test_state();
        let resolved = resolve(&mut scene, &mut overlap, &mut state, target, target, true);

        assert!(resolved.y.abs() < 1.0e-3, "resolved to {resolved:?}");
        assert!(state.is_grounded);
        assert!(state.ground_normal.y > 0.999);
        assert!(state.ground_angle < 0.1);
        assert!((state.ground_position - resolved).norm() < 1.0e-3);

        let hit = &overlap.all_hits()[overlap.collider_indices()[0]];
        assert_eq!(hit.collision_type, CollisionType::Ground);
        assert!(hit.has_penetration);
        assert!(hit.is_within_extent);
        assert!(hit.max_penetration > 0.0);
    }

    #[test]
    fn hovering_within_extent_grounds_through_probe() {
        let mut scene = Scene::new();
        insert_floor(&mut scene);

        // Standing 0.02 above the floor: no penetration, but the ground
        // probe finds the surface within the extent.
        let target = Vector::new(0.0, 0.02, 0.0);
        let mut overlap = overlap_at(&scene, target, RADIUS);
        assert_eq!(overlap.collider_indices().len(), 1);

        let mut state = test_state();
        let resolved = resolve(&mut scene, &mut overlap, &mut state, target, target, true);

        assert_eq!(resolved, target);
        assert!(state.is_grounded);
        assert!((state.ground_distance - 0.02).abs() < 1.0e-3);

        let hit = &overlap.all_hits()[overlap.collider_indices()[0]];
        assert_eq!(hit.collision_type, CollisionType::Ground);
        assert!(!hit.has_penetration);
    }

    #[test]
    fn perpendicular_walls_resolve_exactly() {
        let mut scene = Scene::new();
        for position in [
            Isometry::translation(0.8, 1.0, 0.0),
            Isometry::translation(0.0, 1.0, 0.8),
        ] {
            scene.insert_static_collider(
                ColliderBuilder::cuboid(0.5, 1.0, 0.5)
                    .position(position)
                    .collision_groups(layer_groups(1))
                    .build(),
            );
        }

        // Both wall faces sit at 0.3; the capsule penetrates each by 0.05.
        let target = Vector::zeros();
        let mut overlap = overlap_at(&scene, target, RADIUS);
        assert_eq!(overlap.collider_indices().len(), 2);

        let mut state = test_state();
        let resolved = resolve(&mut scene, &mut overlap, &mut state, target, target, false);

        assert!((resolved - Vector::new(-0.05, 0.0, -0.05)).norm() < 1.0e-3);
        assert!(!state.is_grounded);

        for index in overlap.collider_indices() {
            let hit = &overlap.all_hits()[*index];
            assert_eq!(hit.collision_type, CollisionType::Wall);
        }
    }

    #[test]
    fn shallow_slope_counts_as_ground() {
        let mut scene = Scene::new();
        let (vertices, indices) = wedge_mesh(4.0, 2.0, 3.0);
        scene.insert_static_collider(
            ColliderBuilder::trimesh(vertices, indices)
                .position(Isometry::identity())
                .collision_groups(layer_groups(1))
                .build(),
        );

        // The slope face rises 2 over 4, an incline of about 26.6 degrees.
        let target = Vector::new(2.0, 0.9, 0.0);
        let mut overlap = overlap_at(&scene, target, RADIUS);
        assert_eq!(overlap.collider_indices().len(), 1);

        let mut state = test_state();
        let resolved = resolve(&mut scene, &mut overlap, &mut state, target, target, true);

        assert!(state.is_grounded);
        assert!((state.ground_angle - 26.565).abs() < 0.5);
        assert!(state.ground_normal.x < -0.4);
        // The tangent runs downhill, perpendicular to the normal.
        assert!(state.ground_tangent.y < -0.1);
        assert!(state.ground_tangent.dot(&state.ground_normal).abs() < 1.0e-3);
        assert!(resolved.y > target.y);
    }

    #[test]
    fn steep_slope_classified_but_not_ground() {
        let mut scene = Scene::new();
        let (vertices, indices) = wedge_mesh(4.0, 2.0, 3.0);
        scene.insert_static_collider(
            ColliderBuilder::trimesh(vertices, indices)
                .position(Isometry::identity())
                .collision_groups(layer_groups(1))
                .build(),
        );

        let target = Vector::new(2.0, 0.9, 0.0);
        let mut overlap = overlap_at(&scene, target, RADIUS);

        let mut state = test_state();
        state.max_ground_angle = 20.0;
        resolve(&mut scene, &mut overlap, &mut state, target, target, true);

        assert!(!state.is_grounded);
        let hit = &overlap.all_hits()[overlap.collider_indices()[0]];
        assert_eq!(hit.collision_type, CollisionType::Slope);
        assert!(hit.is_within_extent);
    }

    #[test]
    fn trigger_hits_classified_without_moving_target() {
        let mut scene = Scene::new();
        insert_floor(&mut scene);
        scene.insert_static_collider(
            ColliderBuilder::cuboid(1.0, 1.0, 1.0)
                .position(Isometry::translation(0.0, 1.0, 0.0))
                .collision_groups(layer_groups(1))
                .sensor(true)
                .build(),
        );

        let target = Vector::new(0.0, -0.05, 0.0);
        let mut overlap = overlap_at(&scene, target, RADIUS);
        assert_eq!(overlap.collider_indices().len(), 1);
        assert_eq!(overlap.trigger_indices().len(), 1);

        let mut state = test_state();
        let resolved = resolve(&mut scene, &mut overlap, &mut state, target, target, true);

        assert!(resolved.y.abs() < 1.0e-3);

        let trigger = &overlap.all_hits()[overlap.trigger_indices()[0]];
        assert_eq!(trigger.collision_type, CollisionType::Trigger);
        assert!(trigger.has_penetration);
        assert!(trigger.max_penetration > 0.0);
    }

    #[test]
    fn ground_tangent_is_zero_on_flat_ground() {
        let mut state = test_state();
        state.is_grounded = true;
        state.ground_normal = Vector::y();

        recalculate_ground_properties(&mut state);

        // A flat normal has no XZ part to project, so there is no preferred
        // tangent.
        assert_eq!(state.ground_tangent, Vector::zeros());
    }
}
