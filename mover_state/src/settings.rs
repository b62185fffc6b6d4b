//! Static per-actor tunables: capsule geometry, feature toggles, authority
//! behavior and prediction/interpolation parameters.
//!
//! Settings are loaded from TOML, rarely mutated at runtime, and must stay
//! copy-consistent between the predicting and the authoritative instance of
//! an actor.

use rapier3d::prelude::Real;
use serde::{Deserialize, Serialize};

/// Collider shape driven by the solver. `None` keeps the actor query-only,
/// with no collider of its own registered in the scene.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorShape {
    None,
    #[default]
    Capsule,
}

/// How an authoritative peer advances the render-tick state.
///
/// Fixed ticks are always predicted; the render tick either interpolates
/// between the two most recent fixed results or runs its own prediction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityBehavior {
    #[default]
    InterpolateRender,
    PredictRender,
}

/// How proxies blend remote snapshots.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    /// Interpolate the full state, including velocities and grounding.
    #[default]
    Full,
    /// Interpolate position and look rotation only.
    Transform,
}

/// Optional solver features, all enabled by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSet {
    /// Sub-step long displacements so thin geometry cannot be tunneled
    /// through.
    pub ccd: bool,
    /// Suppress sub-millimeter render jitter around a stable position.
    pub anti_jitter: bool,
    /// Smoothly blend out prediction error instead of snapping.
    pub prediction_correction: bool,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            ccd: true,
            anti_jitter: true,
            prediction_correction: true,
        }
    }
}

/// Per-actor solver configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverSettings {
    pub shape: ActorShape,
    /// Register the actor's own collider as a sensor.
    pub is_trigger: bool,
    /// Capsule radius in meters.
    pub radius: Real,
    /// Capsule height in meters, feet to crown.
    pub height: Real,
    /// Extra margin around the capsule used to track nearby colliders before
    /// they are touching, in meters.
    pub extent: Real,
    /// Actor mass in kilograms; divides impulses and forces.
    pub mass: Real,
    /// Membership bits of the actor's own collider. An actor is visible to
    /// another actor's queries when these bits intersect the other's
    /// `collision_layer_mask`.
    pub collider_layer: u32,
    /// Bit mask of collider groups the solver collides with.
    pub collision_layer_mask: u32,
    /// Behavior of the input-authority (predicting) instance.
    pub input_authority_behavior: AuthorityBehavior,
    /// Behavior of the state-authority (server) instance.
    pub state_authority_behavior: AuthorityBehavior,
    pub proxy_interpolation_mode: InterpolationMode,
    /// Accept teleport-sized position changes from clients.
    pub allow_client_teleports: bool,
    /// Per-tick displacement beyond which a position change counts as a
    /// teleport instead of continuous motion, in meters.
    pub teleport_threshold: Real,
    /// Upper bound on depenetration sub-steps per move step. Valid range is
    /// 1 to 16.
    pub max_penetration_steps: u32,
    /// Fraction of the radius consumed per CCD sub-step. Valid range is 0.25
    /// to 0.75.
    pub ccd_radius_multiplier: Real,
    /// Maximum render-position deviation absorbed by anti-jitter, horizontal
    /// and vertical, in meters.
    pub anti_jitter_distance: [Real; 2],
    /// Speed at which prediction error blends out, in meters per second.
    pub prediction_correction_speed: Real,
    /// Entries mirrored per interaction set in networked state; bounds the
    /// wire size.
    pub networked_interactions: usize,
    /// Quantize networked position to reduce bandwidth.
    pub compress_network_position: bool,
    /// Skip the extent-reuse optimization and re-query every step.
    pub force_single_overlap_query: bool,
    /// Predict look rotation even for render-interpolated instances.
    pub force_predicted_look_rotation: bool,
    /// Swap convertible convex mesh colliders to exact triangle geometry
    /// during depenetration.
    pub suppress_convex_mesh_colliders: bool,
    /// Optional feature toggles. Kept last so the TOML table follows the
    /// scalar keys.
    pub features: FeatureSet,
}

impl Default for MoverSettings {
    fn default() -> Self {
        Self {
            shape: ActorShape::Capsule,
            is_trigger: false,
            radius: 0.35,
            height: 1.8,
            extent: 0.035,
            mass: 1.0,
            collider_layer: 1,
            collision_layer_mask: 1,
            input_authority_behavior: AuthorityBehavior::InterpolateRender,
            state_authority_behavior: AuthorityBehavior::InterpolateRender,
            proxy_interpolation_mode: InterpolationMode::Full,
            allow_client_teleports: false,
            teleport_threshold: 1.0,
            max_penetration_steps: 8,
            ccd_radius_multiplier: 0.75,
            anti_jitter_distance: [0.025, 0.01],
            prediction_correction_speed: 30.0,
            networked_interactions: 8,
            compress_network_position: false,
            force_single_overlap_query: false,
            force_predicted_look_rotation: false,
            suppress_convex_mesh_colliders: false,
            features: FeatureSet::default(),
        }
    }
}

/// Result of [`MoverSettings::validate`].
#[derive(Clone, Debug, Default)]
pub struct SettingsValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SettingsValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl MoverSettings {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string(self).map_err(|err| err.to_string())
    }

    pub fn validate(&self) -> SettingsValidation {
        let mut validation = SettingsValidation::default();

        if !self.radius.is_finite() || self.radius <= 0.0 {
            validation
                .errors
                .push("radius must be finite and > 0".to_string());
        }

        if !self.height.is_finite() || self.height <= 0.0 {
            validation
                .errors
                .push("height must be finite and > 0".to_string());
        } else if self.height < self.radius * 2.0 {
            validation
                .warnings
                .push("height below two radii, the collider will be clamped".to_string());
        }

        if !self.extent.is_finite() {
            validation.errors.push("extent must be finite".to_string());
        } else if self.extent < 0.0 {
            validation
                .warnings
                .push("negative extent will be clamped to 0".to_string());
        }

        if !self.mass.is_finite() || self.mass <= 0.0 {
            validation
                .errors
                .push("mass must be finite and > 0".to_string());
        }

        if self.max_penetration_steps < 1 || self.max_penetration_steps > 16 {
            validation.errors.push(format!(
                "max_penetration_steps {} outside valid range 1..=16",
                self.max_penetration_steps
            ));
        }

        if !(0.25..=0.75).contains(&self.ccd_radius_multiplier) {
            validation.errors.push(format!(
                "ccd_radius_multiplier {} outside valid range 0.25..=0.75",
                self.ccd_radius_multiplier
            ));
        }

        if !self.teleport_threshold.is_finite() || self.teleport_threshold <= 0.0 {
            validation
                .errors
                .push("teleport_threshold must be finite and > 0".to_string());
        }

        if self.features.prediction_correction && self.prediction_correction_speed <= 0.0 {
            validation.warnings.push(
                "prediction_correction enabled with non-positive correction speed".to_string(),
            );
        }

        if self.anti_jitter_distance[0] < 0.0 || self.anti_jitter_distance[1] < 0.0 {
            validation
                .warnings
                .push("negative anti_jitter_distance will be clamped to 0".to_string());
        }

        if self.collider_layer == 0 {
            validation
                .warnings
                .push("collider_layer is 0, other actors cannot collide with this one".to_string());
        }

        if self.networked_interactions == 0 {
            validation
                .warnings
                .push("networked_interactions is 0, interaction sets will not replicate".to_string());
        }

        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = MoverSettings::default();
        let validation = settings.validate();

        assert!(validation.is_ok(), "errors: {:?}", validation.errors);
        assert!(validation.warnings.is_empty(), "warnings: {:?}", validation.warnings);
    }

    #[test]
    fn toml_round_trip_preserves_settings() {
        let mut settings = MoverSettings::default();
        settings.radius = 0.4;
        settings.features.ccd = false;
        settings.state_authority_behavior = AuthorityBehavior::PredictRender;

        let text = settings.to_toml().unwrap();
        let parsed = MoverSettings::parse_toml(&text).unwrap();

        assert_eq!(parsed, settings);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed = MoverSettings::parse_toml("radius = 0.5\n").unwrap();

        assert_eq!(parsed.radius, 0.5);
        assert_eq!(parsed.height, 1.8);
        assert!(parsed.features.anti_jitter);
    }

    #[test]
    fn validation_flags_bad_geometry() {
        let mut settings = MoverSettings::default();
        settings.radius = -1.0;
        settings.max_penetration_steps = 0;

        let validation = settings.validate();
        assert!(!validation.is_ok());
        assert_eq!(validation.errors.len(), 2);
    }

    #[test]
    fn validation_warns_on_clampable_values() {
        let mut settings = MoverSettings::default();
        settings.height = 0.5;
        settings.extent = -0.01;

        let validation = settings.validate();
        assert!(validation.is_ok());
        assert_eq!(validation.warnings.len(), 2);
    }

    #[test]
    fn validation_warns_on_empty_collider_layer() {
        let mut settings = MoverSettings::default();
        settings.collider_layer = 0;

        let validation = settings.validate();
        assert!(validation.is_ok());
        assert_eq!(validation.warnings.len(), 1);
    }
}
