//! Fixed-capacity caches for capsule overlap and sweep queries, plus the
//! surface classification shared by every consumer of those caches.
//!
//! The caches are sized once and reused across ticks; a query writes its
//! parameters and results into the same storage every time, so the steady
//! state performs no allocation. Hits beyond the capacity are dropped in
//! release builds and fail a debug assertion in development builds.

#![forbid(unsafe_code)]

use rapier3d::math::{Isometry, Vector};
use rapier3d::prelude::{ColliderHandle, Real, RigidBodyHandle};

/// Default number of hit slots in overlap and sweep caches.
pub const CACHE_SIZE: usize = 64;

/// Geometry category of a scene collider.
///
/// `None` marks geometry the solver cannot depenetrate from; such colliders
/// never enter a cache.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ShapeKind {
    #[default]
    None,
    Sphere,
    Capsule,
    Box,
    Mesh,
    Terrain,
}

/// How a contacted surface relates to the mover, derived from the angle
/// between the contact normal and the up axis.
///
/// The discriminants are single bits so sets of types can be tested with a
/// mask, see [`CollisionType::bits`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(u32)]
pub enum CollisionType {
    #[default]
    None = 0,
    /// Walkable surface.
    Ground = 1,
    /// Too steep to stand on, not steep enough to count as a wall.
    Slope = 1 << 1,
    /// Near-vertical surface.
    Wall = 1 << 2,
    /// Overhanging surface.
    Hang = 1 << 3,
    /// Ceiling.
    Top = 1 << 4,
    /// Sensor volume; never affects movement.
    Trigger = 1 << 5,
}

impl CollisionType {
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Whether queries report sensor colliders.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TriggerInteraction {
    Ignore,
    #[default]
    Collide,
}

/// Cosine thresholds carving the normal-angle range into ground, slope,
/// wall, hang and top bands.
#[derive(Clone, Copy, Debug)]
pub struct CollisionBands {
    /// Minimum up-dot for a surface to count as ground.
    pub min_ground_dot: Real,
    /// Minimum up-dot for a surface to count as a wall.
    pub min_wall_dot: Real,
    /// Minimum up-dot for a surface to count as an overhang.
    pub min_hang_dot: Real,
}

impl CollisionBands {
    /// Builds the bands from angles in degrees. `max_ground_angle` is
    /// measured from the horizontal plane; `max_wall_angle` and
    /// `max_hang_angle` are measured from the vertical.
    pub fn new(max_ground_angle: Real, max_wall_angle: Real, max_hang_angle: Real) -> Self {
        let min_ground_dot = max_ground_angle.clamp(0.0, 90.0).to_radians().cos();
        let min_wall_dot = -(90.0 - max_wall_angle).clamp(0.0, 90.0).to_radians().cos();
        let min_hang_dot = -(90.0 - max_hang_angle).clamp(0.0, 90.0).to_radians().cos();

        Self {
            min_ground_dot,
            min_wall_dot,
            min_hang_dot,
        }
    }

    /// Classifies a surface by the dot product of its normal with the up
    /// axis.
    pub fn classify(&self, up_dot: Real) -> CollisionType {
        if up_dot >= self.min_ground_dot {
            CollisionType::Ground
        } else if up_dot > -self.min_wall_dot {
            CollisionType::Slope
        } else if up_dot >= self.min_wall_dot {
            CollisionType::Wall
        } else if up_dot >= self.min_hang_dot {
            CollisionType::Hang
        } else {
            CollisionType::Top
        }
    }
}

/// Everything a cache needs to know about a scene collider at hit time.
///
/// Built by the scene backend when a query reports the collider.
#[derive(Clone, Copy, Debug)]
pub struct ColliderProfile {
    pub collider: ColliderHandle,
    pub shape: ShapeKind,
    pub is_trigger: bool,
    /// The collider is convex geometry (always true for primitives).
    pub is_convex: bool,
    /// Sphere, capsule or box.
    pub is_primitive: bool,
    /// Convex mesh that can be temporarily swapped for its exact triangle
    /// geometry during depenetration.
    pub is_convertible: bool,
    pub pose: Isometry<Real>,
}

/// Result of the signed distance probe between the mover capsule and one
/// collider. A positive `depth` means the shapes overlap; a negative one
/// means they are separated by `-depth` along `direction`.
#[derive(Clone, Copy, Debug)]
pub struct Penetration {
    /// Direction that moves the capsule out of (or away from) the collider.
    pub direction: Vector<Real>,
    pub depth: Real,
}

/// Scene backend the solver runs its queries against.
///
/// Query parameters travel inside [`OverlapInfo`] and [`SweepInfo`];
/// implementations append hits through `add_hit` and never resize the
/// caches.
pub trait SceneQuery {
    /// Collects all colliders overlapping the capsule described by `info`.
    fn overlap_capsule(&self, info: &mut OverlapInfo);

    /// Sweeps the capsule described by `info` along `info.direction`,
    /// collecting every hit within `info.max_distance`. Hit order is
    /// backend-defined; call [`SweepInfo::sort_hits`] when order matters.
    fn sweep_capsule(&self, info: &mut SweepInfo);

    /// Casts a ray from `info.position` along `info.direction`, collecting
    /// every hit within `info.max_distance`.
    fn cast_ray(&self, info: &mut SweepInfo);

    /// Probes the penetration between a capsule standing at `position` (feet
    /// point) and one collider. Returns contacts up to `prediction` apart.
    fn compute_penetration(
        &self,
        collider: ColliderHandle,
        position: &Vector<Real>,
        radius: Real,
        height: Real,
        prediction: Real,
    ) -> Option<Penetration>;

    /// Closest point on the collider's surface to `point`.
    fn closest_point(&self, collider: ColliderHandle, point: &Vector<Real>) -> Option<Vector<Real>>;

    /// Swaps a convertible mesh collider between its convex hull and exact
    /// triangle geometry.
    fn set_convex_proxy(&mut self, collider: ColliderHandle, convex: bool);

    /// Reshapes an actor capsule in place and moves it to `layer`, flipping
    /// its sensor flag when `is_trigger` changes.
    fn update_actor(
        &mut self,
        collider: ColliderHandle,
        radius: Real,
        height: Real,
        layer: u32,
        is_trigger: bool,
    );

    /// Moves an actor body so its collider feet stand at `position`.
    fn set_actor_position(&mut self, body: RigidBodyHandle, position: Vector<Real>);

    /// Removes a collider from the scene.
    fn remove_collider(&mut self, collider: ColliderHandle);

    /// Profile of a live collider, or `None` if it no longer exists.
    fn profile(&self, collider: ColliderHandle) -> Option<ColliderProfile>;

    /// Stable actor id attached to a collider, `0` for anonymous geometry.
    fn actor_id(&self, collider: ColliderHandle) -> u64;
}

/// One collider found by an overlap query, together with the classification
/// the depenetration pass fills in.
#[derive(Clone, Copy, Debug)]
pub struct OverlapHit {
    pub collider: ColliderHandle,
    pub shape: ShapeKind,
    pub is_trigger: bool,
    pub is_convex: bool,
    pub is_primitive: bool,
    pub is_convertible: bool,
    /// The collider is within the capsule's extent-inflated volume.
    pub is_within_extent: bool,
    /// The collider intersects the exact capsule volume.
    pub has_penetration: bool,
    /// Deepest penetration seen for this collider during the current pass.
    pub max_penetration: Real,
    /// Up-dot of the most significant contact normal.
    pub up_direction_dot: Real,
    pub collision_type: CollisionType,
}

impl OverlapHit {
    fn from_profile(profile: &ColliderProfile) -> Self {
        Self {
            collider: profile.collider,
            shape: profile.shape,
            is_trigger: profile.is_trigger,
            is_convex: profile.is_convex,
            is_primitive: profile.is_primitive,
            is_convertible: profile.is_convertible,
            is_within_extent: false,
            has_penetration: false,
            max_penetration: 0.0,
            up_direction_dot: 0.0,
            collision_type: CollisionType::None,
        }
    }
}

/// Reusable result cache for capsule overlap queries.
///
/// Hits are partitioned into trigger and solid collider index lists as they
/// arrive, so consumers can walk either subset without re-testing flags.
pub struct OverlapInfo {
    pub position: Vector<Real>,
    pub radius: Real,
    pub height: Real,
    pub extent: Real,
    pub layer_mask: u32,
    pub trigger_interaction: TriggerInteraction,
    /// Rigid body whose colliders the query skips, usually the actor itself.
    pub exclude_body: Option<RigidBodyHandle>,
    /// Colliders the query skips.
    pub ignored_colliders: Vec<ColliderHandle>,

    hits: Vec<OverlapHit>,
    trigger_indices: Vec<usize>,
    collider_indices: Vec<usize>,
}

impl OverlapInfo {
    pub fn new(max_hits: usize) -> Self {
        Self {
            position: Vector::zeros(),
            radius: 0.0,
            height: 0.0,
            extent: 0.0,
            layer_mask: 0,
            trigger_interaction: TriggerInteraction::Collide,
            exclude_body: None,
            ignored_colliders: Vec::with_capacity(max_hits),
            hits: Vec::with_capacity(max_hits),
            trigger_indices: Vec::with_capacity(max_hits),
            collider_indices: Vec::with_capacity(max_hits),
        }
    }

    /// Clears previous results and records the parameters of the next query.
    /// Exclusions are cleared too and must be re-filled afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn set_query(
        &mut self,
        position: Vector<Real>,
        radius: Real,
        height: Real,
        extent: Real,
        layer_mask: u32,
        trigger_interaction: TriggerInteraction,
    ) {
        self.reset();

        self.position = position;
        self.radius = radius;
        self.height = height;
        self.extent = extent;
        self.layer_mask = layer_mask;
        self.trigger_interaction = trigger_interaction;
    }

    /// Appends a hit. Returns `false` for unsupported geometry or when the
    /// cache is full; the cache is left untouched in both cases. A capacity
    /// drop trips a debug assertion, since peers disagreeing on which hits
    /// survived the cap can diverge.
    pub fn add_hit(&mut self, profile: &ColliderProfile) -> bool {
        if self.hits.len() == self.hits.capacity() {
            debug_assert!(false, "overlap cache full, hit dropped");
            return false;
        }
        if profile.shape == ShapeKind::None {
            return false;
        }

        let index = self.hits.len();
        self.hits.push(OverlapHit::from_profile(profile));

        if profile.is_trigger {
            self.trigger_indices.push(index);
        } else {
            self.collider_indices.push(index);
        }

        true
    }

    pub fn hit_count(&self) -> usize {
        self.hits.len()
    }

    pub fn all_hits(&self) -> &[OverlapHit] {
        &self.hits
    }

    pub fn all_hits_mut(&mut self) -> &mut [OverlapHit] {
        &mut self.hits
    }

    /// Indices into [`Self::all_hits`] for sensor colliders.
    pub fn trigger_indices(&self) -> &[usize] {
        &self.trigger_indices
    }

    /// Indices into [`Self::all_hits`] for solid colliders.
    pub fn collider_indices(&self) -> &[usize] {
        &self.collider_indices
    }

    pub fn trigger_hits(&self) -> impl Iterator<Item = &OverlapHit> + '_ {
        self.trigger_indices.iter().map(|&index| &self.hits[index])
    }

    pub fn collider_hits(&self) -> impl Iterator<Item = &OverlapHit> + '_ {
        self.collider_indices
            .iter()
            .map(|&index| &self.hits[index])
    }

    /// True when every recorded hit lies within the extent-inflated volume.
    /// An empty cache counts as true.
    pub fn all_hits_within_extent(&self) -> bool {
        self.hits.iter().all(|hit| hit.is_within_extent)
    }

    /// Flips convertible mesh colliders between hull and exact geometry for
    /// every recorded solid hit.
    pub fn toggle_convex_mesh_colliders(&self, scene: &mut dyn SceneQuery, convex: bool) {
        for hit in self.collider_hits() {
            if hit.shape == ShapeKind::Mesh && hit.is_convertible {
                scene.set_convex_proxy(hit.collider, convex);
            }
        }
    }

    /// Clears results and query parameters.
    pub fn reset(&mut self) {
        self.position = Vector::zeros();
        self.radius = 0.0;
        self.height = 0.0;
        self.extent = 0.0;
        self.layer_mask = 0;
        self.trigger_interaction = TriggerInteraction::Collide;
        self.exclude_body = None;
        self.ignored_colliders.clear();

        self.hits.clear();
        self.trigger_indices.clear();
        self.collider_indices.clear();
    }

    /// Replicates another cache of the same capacity into this one.
    pub fn copy_from_other(&mut self, other: &Self) {
        self.position = other.position;
        self.radius = other.radius;
        self.height = other.height;
        self.extent = other.extent;
        self.layer_mask = other.layer_mask;
        self.trigger_interaction = other.trigger_interaction;
        self.exclude_body = other.exclude_body;
        self.ignored_colliders.clear();
        self.ignored_colliders
            .extend_from_slice(&other.ignored_colliders);

        self.hits.clear();
        self.hits.extend_from_slice(&other.hits);
        self.trigger_indices.clear();
        self.trigger_indices.extend_from_slice(&other.trigger_indices);
        self.collider_indices.clear();
        self.collider_indices
            .extend_from_slice(&other.collider_indices);
    }
}

impl Default for OverlapInfo {
    fn default() -> Self {
        Self::new(CACHE_SIZE)
    }
}

/// One collider found by a capsule sweep or ray cast.
#[derive(Clone, Copy, Debug)]
pub struct SweepHit {
    pub collider: ColliderHandle,
    pub shape: ShapeKind,
    pub is_trigger: bool,
    pub is_primitive: bool,
    /// World-space contact point.
    pub point: Vector<Real>,
    /// World-space contact normal.
    pub normal: Vector<Real>,
    /// Travel distance along the sweep direction at first contact.
    pub distance: Real,
}

/// Reusable result cache for capsule sweeps and ray casts.
pub struct SweepInfo {
    pub position: Vector<Real>,
    pub radius: Real,
    pub height: Real,
    pub extent: Real,
    pub direction: Vector<Real>,
    pub max_distance: Real,
    pub layer_mask: u32,
    pub trigger_interaction: TriggerInteraction,
    /// Rigid body whose colliders the query skips, usually the actor itself.
    pub exclude_body: Option<RigidBodyHandle>,
    /// Colliders the query skips.
    pub ignored_colliders: Vec<ColliderHandle>,

    hits: Vec<SweepHit>,
    trigger_indices: Vec<usize>,
    collider_indices: Vec<usize>,
}

impl SweepInfo {
    pub fn new(max_hits: usize) -> Self {
        Self {
            position: Vector::zeros(),
            radius: 0.0,
            height: 0.0,
            extent: 0.0,
            direction: Vector::zeros(),
            max_distance: 0.0,
            layer_mask: 0,
            trigger_interaction: TriggerInteraction::Collide,
            exclude_body: None,
            ignored_colliders: Vec::with_capacity(max_hits),
            hits: Vec::with_capacity(max_hits),
            trigger_indices: Vec::with_capacity(max_hits),
            collider_indices: Vec::with_capacity(max_hits),
        }
    }

    /// Clears previous results and records the parameters of the next query.
    /// Exclusions are cleared too and must be re-filled afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn set_query(
        &mut self,
        position: Vector<Real>,
        radius: Real,
        height: Real,
        extent: Real,
        direction: Vector<Real>,
        max_distance: Real,
        layer_mask: u32,
        trigger_interaction: TriggerInteraction,
    ) {
        self.reset();

        self.position = position;
        self.radius = radius;
        self.height = height;
        self.extent = extent;
        self.direction = direction;
        self.max_distance = max_distance;
        self.layer_mask = layer_mask;
        self.trigger_interaction = trigger_interaction;
    }

    /// Appends a hit. Returns `false` for unsupported geometry or when the
    /// cache is full; the cache is left untouched in both cases. A capacity
    /// drop trips a debug assertion, since peers disagreeing on which hits
    /// survived the cap can diverge.
    pub fn add_hit(
        &mut self,
        profile: &ColliderProfile,
        point: Vector<Real>,
        normal: Vector<Real>,
        distance: Real,
    ) -> bool {
        if self.hits.len() == self.hits.capacity() {
            debug_assert!(false, "sweep cache full, hit dropped");
            return false;
        }
        if profile.shape == ShapeKind::None {
            return false;
        }

        let index = self.hits.len();
        self.hits.push(SweepHit {
            collider: profile.collider,
            shape: profile.shape,
            is_trigger: profile.is_trigger,
            is_primitive: profile.is_primitive,
            point,
            normal,
            distance,
        });

        if profile.is_trigger {
            self.trigger_indices.push(index);
        } else {
            self.collider_indices.push(index);
        }

        true
    }

    pub fn hit_count(&self) -> usize {
        self.hits.len()
    }

    pub fn all_hits(&self) -> &[SweepHit] {
        &self.hits
    }

    /// Indices into [`Self::all_hits`] for sensor colliders.
    pub fn trigger_indices(&self) -> &[usize] {
        &self.trigger_indices
    }

    /// Indices into [`Self::all_hits`] for solid colliders.
    pub fn collider_indices(&self) -> &[usize] {
        &self.collider_indices
    }

    pub fn trigger_hits(&self) -> impl Iterator<Item = &SweepHit> + '_ {
        self.trigger_indices.iter().map(|&index| &self.hits[index])
    }

    pub fn collider_hits(&self) -> impl Iterator<Item = &SweepHit> + '_ {
        self.collider_indices
            .iter()
            .map(|&index| &self.hits[index])
    }

    /// Sorts hits by ascending distance, keeping the arrival order of equal
    /// distances, and rebuilds the partitions only if anything moved.
    pub fn sort_hits(&mut self) {
        let count = self.hits.len();
        if count <= 1 {
            return;
        }

        let mut has_changed = false;
        let mut is_sorted = false;

        while !is_sorted {
            is_sorted = true;

            for right in 1..count {
                let left = right - 1;

                if self.hits[left].distance > self.hits[right].distance {
                    self.hits.swap(left, right);

                    is_sorted = false;
                    has_changed = true;
                }
            }
        }

        if has_changed {
            self.trigger_indices.clear();
            self.collider_indices.clear();

            for (index, hit) in self.hits.iter().enumerate() {
                if hit.is_trigger {
                    self.trigger_indices.push(index);
                } else {
                    self.collider_indices.push(index);
                }
            }
        }
    }

    /// Clears results and query parameters.
    pub fn reset(&mut self) {
        self.position = Vector::zeros();
        self.radius = 0.0;
        self.height = 0.0;
        self.extent = 0.0;
        self.direction = Vector::zeros();
        self.max_distance = 0.0;
        self.layer_mask = 0;
        self.trigger_interaction = TriggerInteraction::Collide;
        self.exclude_body = None;
        self.ignored_colliders.clear();

        self.hits.clear();
        self.trigger_indices.clear();
        self.collider_indices.clear();
    }
}

impl Default for SweepInfo {
    fn default() -> Self {
        Self::new(CACHE_SIZE)
    }
}
