//! Query-only collision scene backed by rapier.
//!
//! [`Scene`] owns the collider sets and the query pipeline and answers the
//! overlap, sweep and penetration probes of [`collision_cache::SceneQuery`].
//! Nothing here steps a dynamics pipeline; geometry moves only through
//! explicit calls, after which the acceleration structures are refreshed.
//!
//! Positions handed to the queries are feet points: the capsule stands on
//! them, its center `height / 2` above.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use collision_cache::{
    ColliderProfile, OverlapInfo, Penetration, SceneQuery, ShapeKind, SweepInfo,
    TriggerInteraction, CACHE_SIZE,
};
use rapier3d::parry::query;
use rapier3d::parry::query::ShapeCastOptions;
use rapier3d::prelude::*;

/// Exact and hull geometry of a convertible mesh collider. Depenetration
/// swaps the exact triangles in while it runs, then restores the hull.
struct MeshProxy {
    exact: SharedShape,
    hull: SharedShape,
    convex_active: bool,
}

/// Static geometry plus kinematic actor capsules, queryable through
/// [`SceneQuery`].
pub struct Scene {
    bodies: RigidBodySet,
    colliders: ColliderSet,
    islands: IslandManager,
    query_pipeline: QueryPipeline,
    meshes: HashMap<ColliderHandle, MeshProxy>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            islands: IslandManager::new(),
            query_pipeline: QueryPipeline::new(),
            meshes: HashMap::new(),
        }
    }

    pub fn colliders(&self) -> &ColliderSet {
        &self.colliders
    }

    pub fn bodies(&self) -> &RigidBodySet {
        &self.bodies
    }

    /// Inserts a parent-less collider and refreshes the query structures.
    pub fn insert_static_collider(&mut self, collider: Collider) -> ColliderHandle {
        let handle = self.colliders.insert(collider);
        self.refresh_queries();
        handle
    }

    /// Inserts a convex mesh collider whose exact triangle geometry stays
    /// available for [`SceneQuery::set_convex_proxy`]. Falls back to the
    /// plain triangle mesh when a hull cannot be built from the vertices.
    pub fn insert_convex_mesh_collider(
        &mut self,
        vertices: Vec<Point<Real>>,
        indices: Vec<[u32; 3]>,
        pose: Isometry<Real>,
        layer: u32,
    ) -> ColliderHandle {
        let hull = SharedShape::convex_hull(&vertices);
        let exact = SharedShape::trimesh(vertices, indices);

        match hull {
            Some(hull) => {
                let collider = ColliderBuilder::new(hull.clone())
                    .position(pose)
                    .collision_groups(layer_groups(layer))
                    .build();
                let handle = self.colliders.insert(collider);
                self.meshes.insert(
                    handle,
                    MeshProxy {
                        exact,
                        hull,
                        convex_active: true,
                    },
                );
                self.refresh_queries();
                handle
            }
            None => self.insert_static_collider(
                ColliderBuilder::new(exact)
                    .position(pose)
                    .collision_groups(layer_groups(layer))
                    .build(),
            ),
        }
    }

    /// Inserts a kinematic actor body carrying a capsule collider whose feet
    /// stand at `position`. The body handle can be fed to query exclusions so
    /// an actor never collides with itself.
    pub fn insert_actor(
        &mut self,
        position: Vector<Real>,
        radius: Real,
        height: Real,
        layer: u32,
        actor_id: u64,
    ) -> (RigidBodyHandle, ColliderHandle) {
        let body = RigidBodyBuilder::kinematic_position_based()
            .translation(position)
            .build();
        let body_handle = self.bodies.insert(body);

        let half_height = (height * 0.5 - radius).max(0.0);
        let collider = ColliderBuilder::capsule_y(half_height, radius)
            .position(Isometry::translation(0.0, height * 0.5, 0.0))
            .collision_groups(layer_groups(layer))
            .user_data(actor_id as u128)
            .build();
        let collider_handle = self
            .colliders
            .insert_with_parent(collider, body_handle, &mut self.bodies);

        self.refresh_queries();
        (body_handle, collider_handle)
    }

    /// Rebuilds the query acceleration structure after geometry changed.
    pub fn refresh_queries(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneQuery for Scene {
    fn overlap_capsule(&self, info: &mut OverlapInfo) {
        let capsule = capsule_shape(info.radius + info.extent, info.height + info.extent * 2.0);
        let pose = capsule_pose(&info.position, info.height);

        let ignored = std::mem::take(&mut info.ignored_colliders);
        let keep = |handle: ColliderHandle, _: &Collider| !ignored.contains(&handle);
        let filter =
            base_filter(info.layer_mask, info.trigger_interaction, info.exclude_body)
                .predicate(&keep);

        self.query_pipeline.intersections_with_shape(
            &self.bodies,
            &self.colliders,
            &pose,
            &capsule,
            filter,
            |handle| match self.profile(handle) {
                Some(profile) if profile.shape != ShapeKind::None => info.add_hit(&profile),
                _ => true,
            },
        );

        info.ignored_colliders = ignored;
    }

    fn sweep_capsule(&self, info: &mut SweepInfo) {
        let length = info.direction.norm();
        if length < 1.0e-9 || info.max_distance <= 0.0 {
            return;
        }
        let direction = info.direction / length;
        let capsule = capsule_shape(info.radius + info.extent, info.height + info.extent * 2.0);
        let pose = capsule_pose(&info.position, info.height);
        let options = ShapeCastOptions {
            max_time_of_impact: info.max_distance,
            target_distance: 0.0,
            stop_at_penetration: true,
            compute_impact_geometry_on_penetration: true,
        };

        let ignored = std::mem::take(&mut info.ignored_colliders);
        let mut found: Vec<ColliderHandle> = Vec::with_capacity(CACHE_SIZE);

        // One cast per collider, nearest first; excluding previous finds
        // turns the single-hit query into a collect-all.
        loop {
            let keep = |handle: ColliderHandle, _: &Collider| {
                !found.contains(&handle) && !ignored.contains(&handle)
            };
            let filter =
                base_filter(info.layer_mask, info.trigger_interaction, info.exclude_body)
                    .predicate(&keep);

            let Some((handle, hit)) = self.query_pipeline.cast_shape(
                &self.bodies,
                &self.colliders,
                &pose,
                &direction,
                &capsule,
                options,
                filter,
            ) else {
                break;
            };

            found.push(handle);
            let Some(profile) = self.profile(handle) else {
                continue;
            };
            if profile.shape == ShapeKind::None {
                continue;
            }
            if !info.add_hit(
                &profile,
                hit.witness1.coords,
                hit.normal1.into_inner(),
                hit.time_of_impact,
            ) {
                break;
            }
        }

        info.ignored_colliders = ignored;
    }

    fn cast_ray(&self, info: &mut SweepInfo) {
        let length = info.direction.norm();
        if length < 1.0e-9 || info.max_distance <= 0.0 {
            return;
        }
        let ray = Ray::new(Point::from(info.position), info.direction / length);

        let ignored = std::mem::take(&mut info.ignored_colliders);
        let keep = |handle: ColliderHandle, _: &Collider| !ignored.contains(&handle);
        let filter =
            base_filter(info.layer_mask, info.trigger_interaction, info.exclude_body)
                .predicate(&keep);

        self.query_pipeline.intersections_with_ray(
            &self.bodies,
            &self.colliders,
            &ray,
            info.max_distance,
            true,
            filter,
            |handle, intersection| {
                let Some(profile) = self.profile(handle) else {
                    return true;
                };
                if profile.shape == ShapeKind::None {
                    return true;
                }
                info.add_hit(
                    &profile,
                    ray.point_at(intersection.time_of_impact).coords,
                    intersection.normal,
                    intersection.time_of_impact,
                )
            },
        );

        info.ignored_colliders = ignored;
    }

    fn compute_penetration(
        &self,
        collider: ColliderHandle,
        position: &Vector<Real>,
        radius: Real,
        height: Real,
        prediction: Real,
    ) -> Option<Penetration> {
        let collider = self.colliders.get(collider)?;
        let capsule = capsule_shape(radius, height);
        let pose = capsule_pose(position, height);

        // Collider first: `normal1` then points out of the collider, which
        // is the direction that separates the capsule.
        let contact = query::contact(
            collider.position(),
            collider.shape(),
            &pose,
            &capsule,
            prediction,
        )
        .ok()??;

        Some(Penetration {
            direction: contact.normal1.into_inner(),
            depth: -contact.dist,
        })
    }

    fn closest_point(&self, collider: ColliderHandle, point: &Vector<Real>) -> Option<Vector<Real>> {
        let collider = self.colliders.get(collider)?;
        let projection =
            collider
                .shape()
                .project_point(collider.position(), &Point::from(*point), true);
        Some(projection.point.coords)
    }

    fn set_convex_proxy(&mut self, collider: ColliderHandle, convex: bool) {
        let Some(proxy) = self.meshes.get_mut(&collider) else {
            return;
        };
        if proxy.convex_active == convex {
            return;
        }
        proxy.convex_active = convex;

        let shape = if convex {
            proxy.hull.clone()
        } else {
            proxy.exact.clone()
        };
        if let Some(collider) = self.colliders.get_mut(collider) {
            collider.set_shape(shape);
        }
        self.query_pipeline.update(&self.colliders);
    }

    fn update_actor(
        &mut self,
        collider: ColliderHandle,
        radius: Real,
        height: Real,
        layer: u32,
        is_trigger: bool,
    ) {
        if let Some(collider) = self.colliders.get_mut(collider) {
            let half_height = (height * 0.5 - radius).max(0.0);
            collider.set_shape(SharedShape::capsule_y(half_height, radius));
            collider.set_position_wrt_parent(Isometry::translation(0.0, height * 0.5, 0.0));
            collider.set_collision_groups(layer_groups(layer));
            collider.set_sensor(is_trigger);
        }
        self.refresh_queries();
    }

    fn set_actor_position(&mut self, body: RigidBodyHandle, position: Vector<Real>) {
        if let Some(body) = self.bodies.get_mut(body) {
            body.set_position(
                Isometry::translation(position.x, position.y, position.z),
                true,
            );
        }
        self.bodies
            .propagate_modified_body_positions_to_colliders(&mut self.colliders);
        self.refresh_queries();
    }

    fn remove_collider(&mut self, collider: ColliderHandle) {
        self.meshes.remove(&collider);
        if self
            .colliders
            .remove(collider, &mut self.islands, &mut self.bodies, false)
            .is_some()
        {
            self.refresh_queries();
        }
    }

    fn profile(&self, collider: ColliderHandle) -> Option<ColliderProfile> {
        let handle = collider;
        let collider = self.colliders.get(handle)?;
        let shape = shape_kind(collider.shape());

        Some(ColliderProfile {
            collider: handle,
            shape,
            is_trigger: collider.is_sensor(),
            is_convex: shape_is_convex(collider.shape()),
            is_primitive: matches!(
                shape,
                ShapeKind::Sphere | ShapeKind::Capsule | ShapeKind::Box
            ),
            is_convertible: self.meshes.contains_key(&handle),
            pose: *collider.position(),
        })
    }

    fn actor_id(&self, collider: ColliderHandle) -> u64 {
        self.colliders
            .get(collider)
            .map(|collider| collider.user_data as u64)
            .unwrap_or(0)
    }
}

/// Collision groups for scene geometry living on the layers in `mask`.
pub fn layer_groups(mask: u32) -> InteractionGroups {
    InteractionGroups::new(Group::from_bits_truncate(mask), Group::ALL)
}

/// Closed wedge rising from the origin toe to `height` at `x = length`,
/// `width` wide along z. Used for ramp fixtures.
pub fn wedge_mesh(length: Real, height: Real, width: Real) -> (Vec<Point<Real>>, Vec<[u32; 3]>) {
    let half_width = width * 0.5;
    let vertices = vec![
        Point::new(0.0, 0.0, -half_width),
        Point::new(0.0, 0.0, half_width),
        Point::new(length, 0.0, half_width),
        Point::new(length, 0.0, -half_width),
        Point::new(length, height, -half_width),
        Point::new(length, height, half_width),
    ];
    let indices = vec![
        [0, 2, 1],
        [0, 3, 2],
        [3, 4, 5],
        [3, 5, 2],
        [0, 1, 5],
        [0, 5, 4],
        [0, 4, 3],
        [1, 2, 5],
    ];
    (vertices, indices)
}

fn query_groups(mask: u32) -> InteractionGroups {
    InteractionGroups::new(Group::ALL, Group::from_bits_truncate(mask))
}

fn base_filter<'a>(
    layer_mask: u32,
    trigger_interaction: TriggerInteraction,
    exclude_body: Option<RigidBodyHandle>,
) -> QueryFilter<'a> {
    let mut filter = QueryFilter::new().groups(query_groups(layer_mask));
    if trigger_interaction == TriggerInteraction::Ignore {
        filter.flags |= QueryFilterFlags::EXCLUDE_SENSORS;
    }
    if let Some(body) = exclude_body {
        filter = filter.exclude_rigid_body(body);
    }
    filter
}

fn capsule_shape(radius: Real, height: Real) -> Capsule {
    let half_height = (height * 0.5 - radius).max(0.0);
    Capsule::new_y(half_height, radius)
}

fn capsule_pose(position: &Vector<Real>, height: Real) -> Isometry<Real> {
    Isometry::translation(position.x, position.y + height * 0.5, position.z)
}

fn shape_kind(shape: &dyn Shape) -> ShapeKind {
    match shape.shape_type() {
        ShapeType::Ball => ShapeKind::Sphere,
        ShapeType::Capsule => ShapeKind::Capsule,
        ShapeType::Cuboid | ShapeType::RoundCuboid => ShapeKind::Box,
        ShapeType::TriMesh
        | ShapeType::ConvexPolyhedron
        | ShapeType::RoundConvexPolyhedron
        | ShapeType::Cylinder
        | ShapeType::RoundCylinder
        | ShapeType::Cone
        | ShapeType::RoundCone => ShapeKind::Mesh,
        ShapeType::HeightField => ShapeKind::Terrain,
        _ => ShapeKind::None,
    }
}

fn shape_is_convex(shape: &dyn Shape) -> bool {
    shape_kind(shape) != ShapeKind::None
        && !matches!(
            shape.shape_type(),
            ShapeType::TriMesh | ShapeType::HeightField
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const RADIUS: Real = 0.35;
    const HEIGHT: Real = 1.8;
    const EXTENT: Real = 0.035;

    fn insert_floor(scene: &mut Scene, layer: u32) -> ColliderHandle {
        // Top face at y = 0.
        scene.insert_static_collider(
            ColliderBuilder::cuboid(10.0, 0.5, 10.0)
                .position(Isometry::translation(0.0, -0.5, 0.0))
                .collision_groups(layer_groups(layer))
                .build(),
        )
    }

    fn overlap_at(scene: &Scene, position: Vector<Real>, layer_mask: u32) -> OverlapInfo {
        let mut info = OverlapInfo::default();
        info.set_query(
            position,
            RADIUS,
            HEIGHT,
            EXTENT,
            layer_mask,
            TriggerInteraction::Collide,
        );
        scene.overlap_capsule(&mut info);
        info
    }

    #[test]
    fn overlap_finds_floor_within_extent() {
        let mut scene = Scene::new();
        let floor = insert_floor(&mut scene, 1);

        // Feet hover 2 cm above the floor, inside the 3.5 cm extent.
        let info = overlap_at(&scene, Vector::new(0.0, 0.02, 0.0), 1);
        assert_eq!(info.hit_count(), 1);

        let hit = &info.all_hits()[0];
        assert_eq!(hit.collider, floor);
        assert_eq!(hit.shape, ShapeKind::Box);
        assert!(hit.is_primitive);
        assert!(!hit.is_trigger);

        // Out of reach once the gap exceeds the extent.
        let info = overlap_at(&scene, Vector::new(0.0, 0.1, 0.0), 1);
        assert_eq!(info.hit_count(), 0);
    }

    #[test]
    fn overlap_honors_layer_mask() {
        let mut scene = Scene::new();
        insert_floor(&mut scene, 1 << 3);

        assert_eq!(overlap_at(&scene, Vector::new(0.0, -0.05, 0.0), 1).hit_count(), 0);
        assert_eq!(
            overlap_at(&scene, Vector::new(0.0, -0.05, 0.0), 1 << 3).hit_count(),
            1
        );
    }

    #[test]
    fn overlap_partitions_triggers_and_ignores_them_on_request() {
        let mut scene = Scene::new();
        insert_floor(&mut scene, 1);
        scene.insert_static_collider(
            ColliderBuilder::cuboid(1.0, 1.0, 1.0)
                .position(Isometry::translation(0.0, 1.0, 0.0))
                .collision_groups(layer_groups(1))
                .sensor(true)
                .build(),
        );

        let info = overlap_at(&scene, Vector::new(0.0, -0.05, 0.0), 1);
        assert_eq!(info.hit_count(), 2);
        assert_eq!(info.trigger_indices().len(), 1);
        assert_eq!(info.collider_indices().len(), 1);

        let mut info = OverlapInfo::default();
        info.set_query(
            Vector::new(0.0, -0.05, 0.0),
            RADIUS,
            HEIGHT,
            EXTENT,
            1,
            TriggerInteraction::Ignore,
        );
        scene.overlap_capsule(&mut info);
        assert_eq!(info.hit_count(), 1);
        assert_eq!(info.trigger_indices().len(), 0);
    }

    #[test]
    fn overlap_skips_ignored_colliders_and_excluded_body() {
        let mut scene = Scene::new();
        let floor = insert_floor(&mut scene, 1);
        let (body, _) = scene.insert_actor(Vector::new(0.3, 0.0, 0.0), RADIUS, HEIGHT, 1, 9);

        let info = overlap_at(&scene, Vector::new(0.0, -0.05, 0.0), 1);
        assert_eq!(info.hit_count(), 2);

        let mut info = OverlapInfo::default();
        info.set_query(
            Vector::new(0.0, -0.05, 0.0),
            RADIUS,
            HEIGHT,
            EXTENT,
            1,
            TriggerInteraction::Collide,
        );
        info.ignored_colliders.push(floor);
        info.exclude_body = Some(body);
        scene.overlap_capsule(&mut info);
        assert_eq!(info.hit_count(), 0);
    }

    #[test]
    fn overlap_stops_silently_at_capacity() {
        let mut scene = Scene::new();
        for index in 0..CACHE_SIZE + 8 {
            scene.insert_static_collider(
                ColliderBuilder::ball(0.05)
                    .position(Isometry::translation(0.0, 0.5 + index as Real * 0.001, 0.0))
                    .collision_groups(layer_groups(1))
                    .build(),
            );
        }

        let info = overlap_at(&scene, Vector::new(0.0, 0.0, 0.0), 1);
        assert_eq!(info.hit_count(), CACHE_SIZE);
    }

    #[test]
    fn sweep_reports_contact_distance_and_normal() {
        let mut scene = Scene::new();
        insert_floor(&mut scene, 1);

        let mut info = SweepInfo::default();
        info.set_query(
            Vector::new(0.0, 2.0, 0.0),
            RADIUS,
            HEIGHT,
            0.0,
            Vector::new(0.0, -1.0, 0.0),
            5.0,
            1,
            TriggerInteraction::Collide,
        );
        scene.sweep_capsule(&mut info);

        assert_eq!(info.hit_count(), 1);
        let hit = &info.all_hits()[0];
        assert!((hit.distance - 2.0).abs() < 1.0e-3);
        assert!(hit.normal.y > 0.99);
        assert!(hit.point.y.abs() < 1.0e-3);
    }

    #[test]
    fn sweep_collects_every_collider_along_the_path() {
        let mut scene = Scene::new();
        insert_floor(&mut scene, 1);
        // Thin slab with its top face at y = 1.1.
        scene.insert_static_collider(
            ColliderBuilder::cuboid(0.2, 0.1, 0.2)
                .position(Isometry::translation(0.0, 1.0, 0.0))
                .collision_groups(layer_groups(1))
                .build(),
        );

        let mut info = SweepInfo::default();
        info.set_query(
            Vector::new(0.0, 3.0, 0.0),
            RADIUS,
            HEIGHT,
            0.0,
            Vector::new(0.0, -1.0, 0.0),
            5.0,
            1,
            TriggerInteraction::Collide,
        );
        scene.sweep_capsule(&mut info);

        assert_eq!(info.hit_count(), 2);
        let hits = info.all_hits();
        assert!(hits[0].distance < hits[1].distance);
        assert!((hits[0].distance - 1.9).abs() < 1.0e-3);
        assert!((hits[1].distance - 3.0).abs() < 1.0e-3);
    }

    #[test]
    fn sweep_with_degenerate_query_is_a_no_op() {
        let mut scene = Scene::new();
        insert_floor(&mut scene, 1);

        let mut info = SweepInfo::default();
        info.set_query(
            Vector::new(0.0, 2.0, 0.0),
            RADIUS,
            HEIGHT,
            0.0,
            Vector::zeros(),
            5.0,
            1,
            TriggerInteraction::Collide,
        );
        scene.sweep_capsule(&mut info);
        assert_eq!(info.hit_count(), 0);

        info.set_query(
            Vector::new(0.0, 2.0, 0.0),
            RADIUS,
            HEIGHT,
            0.0,
            Vector::new(0.0, -1.0, 0.0),
            0.0,
            1,
            TriggerInteraction::Collide,
        );
        scene.sweep_capsule(&mut info);
        assert_eq!(info.hit_count(), 0);
    }

    #[test]
    fn ray_cast_reports_surface_point() {
        let mut scene = Scene::new();
        insert_floor(&mut scene, 1);

        let mut info = SweepInfo::default();
        info.set_query(
            Vector::new(0.5, 2.0, 0.5),
            0.0,
            0.0,
            0.0,
            Vector::new(0.0, -1.0, 0.0),
            10.0,
            1,
            TriggerInteraction::Collide,
        );
        scene.cast_ray(&mut info);

        assert_eq!(info.hit_count(), 1);
        let hit = &info.all_hits()[0];
        assert!((hit.distance - 2.0).abs() < 1.0e-3);
        assert!(hit.normal.y > 0.99);
        assert!((hit.point.x - 0.5).abs() < 1.0e-3);
        assert!(hit.point.y.abs() < 1.0e-3);
    }

    #[test]
    fn penetration_probe_reports_depth_and_separation() {
        let mut scene = Scene::new();
        let floor = insert_floor(&mut scene, 1);

        // Feet 10 cm below the floor top.
        let feet = Vector::new(0.0, -0.1, 0.0);
        let contact = scene
            .compute_penetration(floor, &feet, RADIUS, HEIGHT, 0.0)
            .unwrap();
        assert!(contact.direction.y > 0.99);
        assert!((contact.depth - 0.1).abs() < 1.0e-3);

        // Separated by 5 cm, visible only through the prediction margin.
        let feet = Vector::new(0.0, 0.05, 0.0);
        assert!(scene
            .compute_penetration(floor, &feet, RADIUS, HEIGHT, 0.0)
            .is_none());
        let contact = scene
            .compute_penetration(floor, &feet, RADIUS, HEIGHT, 0.2)
            .unwrap();
        assert!(contact.depth < 0.0);
        assert!((contact.depth + 0.05).abs() < 1.0e-3);
    }

    #[test]
    fn closest_point_lands_on_the_surface() {
        let mut scene = Scene::new();
        let floor = insert_floor(&mut scene, 1);

        let point = scene
            .closest_point(floor, &Vector::new(0.25, 2.0, -0.25))
            .unwrap();
        assert!((point.x - 0.25).abs() < 1.0e-3);
        assert!(point.y.abs() < 1.0e-3);
        assert!((point.z + 0.25).abs() < 1.0e-3);
    }

    #[test]
    fn convex_proxy_swaps_between_hull_and_exact_triangles() {
        let mut scene = Scene::new();

        // V-shaped trench; the hull seals the opening, the triangles do not.
        let vertices = vec![
            Point::new(-1.0, 1.0, -1.0),
            Point::new(-1.0, 1.0, 1.0),
            Point::new(0.0, 0.0, 1.0),
            Point::new(0.0, 0.0, -1.0),
            Point::new(1.0, 1.0, -1.0),
            Point::new(1.0, 1.0, 1.0),
        ];
        let indices = vec![[0, 1, 2], [0, 2, 3], [4, 2, 5], [4, 3, 2]];
        let handle =
            scene.insert_convex_mesh_collider(vertices, indices, Isometry::identity(), 1);

        let profile = scene.profile(handle).unwrap();
        assert_eq!(profile.shape, ShapeKind::Mesh);
        assert!(profile.is_convex);
        assert!(profile.is_convertible);

        // Standing in the trench center: inside the hull, clear of the walls.
        let feet = Vector::new(0.0, 0.2, 0.0);
        let contact = scene
            .compute_penetration(handle, &feet, RADIUS, HEIGHT, 0.0)
            .unwrap();
        assert!(contact.depth > 0.0);

        scene.set_convex_proxy(handle, false);
        assert!(!scene.profile(handle).unwrap().is_convex);
        assert!(scene
            .compute_penetration(handle, &feet, RADIUS, HEIGHT, 0.0)
            .is_none());

        scene.set_convex_proxy(handle, true);
        assert!(scene.profile(handle).unwrap().is_convex);
    }

    #[test]
    fn wedge_mesh_classifies_as_mesh_geometry() {
        let mut scene = Scene::new();
        let (vertices, indices) = wedge_mesh(4.0, 2.0, 3.0);
        let handle = scene.insert_static_collider(
            ColliderBuilder::trimesh(vertices, indices)
                .position(Isometry::translation(2.0, 0.0, 0.0))
                .collision_groups(layer_groups(1))
                .build(),
        );

        let profile = scene.profile(handle).unwrap();
        assert_eq!(profile.shape, ShapeKind::Mesh);
        assert!(!profile.is_convex);
        assert!(!profile.is_convertible);
        assert_eq!(profile.pose.translation.vector.x, 2.0);

        // Ray down onto the slope face hits between toe and crest.
        let mut info = SweepInfo::default();
        info.set_query(
            Vector::new(4.0, 5.0, 0.0),
            0.0,
            0.0,
            0.0,
            Vector::new(0.0, -1.0, 0.0),
            10.0,
            1,
            TriggerInteraction::Collide,
        );
        scene.cast_ray(&mut info);
        assert_eq!(info.hit_count(), 1);
        let hit = &info.all_hits()[0];
        assert!((hit.point.y - 1.0).abs() < 1.0e-3);
        assert!(hit.normal.y > 0.0);
        assert!(hit.normal.x < 0.0);
    }

    #[test]
    fn actors_move_and_carry_their_id() {
        let mut scene = Scene::new();
        let (body, collider) = scene.insert_actor(Vector::zeros(), RADIUS, HEIGHT, 1, 7);
        assert_eq!(scene.actor_id(collider), 7);

        assert_eq!(overlap_at(&scene, Vector::new(0.1, 0.0, 0.0), 1).hit_count(), 1);

        scene.set_actor_position(body, Vector::new(5.0, 0.0, 0.0));
        assert_eq!(overlap_at(&scene, Vector::new(0.1, 0.0, 0.0), 1).hit_count(), 0);
        assert_eq!(overlap_at(&scene, Vector::new(5.1, 0.0, 0.0), 1).hit_count(), 1);
    }

    #[test]
    fn update_actor_reshapes_and_relayers_the_capsule() {
        let mut scene = Scene::new();
        let (_, collider) = scene.insert_actor(Vector::zeros(), RADIUS, HEIGHT, 1, 7);

        scene.update_actor(collider, 0.5, 2.2, 2, true);

        let profile = scene.profile(collider).unwrap();
        assert_eq!(profile.shape, ShapeKind::Capsule);
        assert!(profile.is_trigger);
        assert_eq!(overlap_at(&scene, Vector::new(0.1, 0.0, 0.0), 1).hit_count(), 0);

        let info = overlap_at(&scene, Vector::new(0.1, 0.0, 0.0), 2);
        assert_eq!(info.hit_count(), 1);
        assert_eq!(info.trigger_indices().len(), 1);
    }

    #[test]
    fn removed_collider_loses_its_profile() {
        let mut scene = Scene::new();
        let floor = insert_floor(&mut scene, 1);
        assert!(scene.profile(floor).is_some());

        scene.remove_collider(floor);
        assert!(scene.profile(floor).is_none());
        assert_eq!(scene.actor_id(floor), 0);
        assert_eq!(overlap_at(&scene, Vector::new(0.0, -0.05, 0.0), 1).hit_count(), 0);
    }
}
