//! Wire codec for the networked subset of the movement state.
//!
//! The encoded form has a fixed size per actor, derived from the settings, so
//! transports can reserve wire slots up front: position as a quantized i32
//! triplet (with an optional f32 extension restoring full precision when
//! compression is off), look rotation, a packed flag word carrying the state
//! and settings bits, capsule geometry, and a bounded interaction block of
//! exactly `networked_interactions` id slots.
//!
//! [`interpolate`] builds the render-facing descriptor between two historical
//! states, detecting teleports by comparing the travelled distance against
//! the teleport threshold scaled by the tick delta.

#![forbid(unsafe_code)]

use std::fmt;

use mover_state::{
    ActorShape, AuthorityBehavior, FeatureSet, InterpolationMode, MoverSettings, MoverState,
};
use rapier3d::math::Vector;
use rapier3d::prelude::{ColliderHandle, Real};

/// Meters per quantization step of the networked position.
pub const POSITION_ACCURACY: Real = 1.0 / 1024.0;

/// Interaction counts travel as one byte each inside the count word.
const MAX_NETWORKED_INTERACTIONS: usize = 255;

const FLAG_IS_ACTIVE: u32 = 1 << 0;
const FLAG_IS_GROUNDED: u32 = 1 << 1;
const FLAG_WAS_GROUNDED: u32 = 1 << 2;
const FLAG_IS_STEPPING_UP: u32 = 1 << 3;
const FLAG_WAS_STEPPING_UP: u32 = 1 << 4;
const FLAG_IS_SNAPPING: u32 = 1 << 5;
const FLAG_WAS_SNAPPING: u32 = 1 << 6;
const FLAG_HAS_TELEPORTED: u32 = 1 << 7;
const FLAG_HAS_JUMPED: u32 = 1 << 8;
const FLAG_IS_TRIGGER: u32 = 1 << 9;
const FLAG_CLIENT_TELEPORTS: u32 = 1 << 10;

const SHAPE_SHIFT: u32 = 11;
const INPUT_AUTHORITY_SHIFT: u32 = 13;
const STATE_AUTHORITY_SHIFT: u32 = 15;
const INTERPOLATION_SHIFT: u32 = 17;
const FEATURES_SHIFT: u32 = 19;

const FLAGS_USED_MASK: u32 = (1 << 22) - 1;

#[derive(Debug)]
pub enum SnapshotError {
    Encode(String),
    Decode(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Encode(msg) => write!(f, "snapshot encode error: {}", msg),
            SnapshotError::Decode(msg) => write!(f, "snapshot decode error: {}", msg),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Exact encoded size in bytes of one state under the given settings.
pub fn snapshot_size(settings: &MoverSettings) -> usize {
    let mut size = 0;

    // Quantized position, plus the precision extension when uncompressed.
    size += 3 * 4;
    if !settings.compress_network_position {
        size += 3 * 4;
    }

    // Look pitch + yaw.
    size += 2 * 4;
    // Flag word.
    size += 4;
    // Collision layer mask + collider layer.
    size += 2 * 4;
    // Radius, height, extent.
    size += 3 * 4;
    // Interaction count word + id slots.
    size += 4 + settings.networked_interactions * 8;

    size
}

/// Encodes the networked subset of `state` under `settings`.
///
/// Interaction entries beyond the reserved slots are dropped, collisions
/// first; anonymous scene geometry (actor id 0) is never networked.
pub fn write_state(
    state: &MoverState,
    settings: &MoverSettings,
) -> Result<Vec<u8>, SnapshotError> {
    if settings.networked_interactions > MAX_NETWORKED_INTERACTIONS {
        return Err(SnapshotError::Encode(format!(
            "networked_interactions {} exceeds {}",
            settings.networked_interactions, MAX_NETWORKED_INTERACTIONS
        )));
    }

    let mut bytes = Vec::with_capacity(snapshot_size(settings));

    let position = state.target_position;
    let mut quantized = [0i32; 3];
    for axis in 0..3 {
        quantized[axis] = quantize_axis(position[axis])?;
        write_i32(&mut bytes, quantized[axis]);
    }
    if !settings.compress_network_position {
        for axis in 0..3 {
            let extension = position[axis] - quantized[axis] as Real * POSITION_ACCURACY;
            write_f32(&mut bytes, extension);
        }
    }

    write_f32(&mut bytes, state.look_pitch());
    write_f32(&mut bytes, state.look_yaw());
    write_u32(&mut bytes, pack_flags(state, settings));
    write_u32(&mut bytes, settings.collision_layer_mask);
    write_u32(&mut bytes, settings.collider_layer);
    write_f32(&mut bytes, settings.radius);
    write_f32(&mut bytes, settings.height);
    write_f32(&mut bytes, settings.extent);

    let slots = settings.networked_interactions;
    let mut ids = Vec::with_capacity(slots);

    let mut collision_count = 0u32;
    for entry in state.collisions.entries() {
        if ids.len() == slots {
            break;
        }
        if entry.actor_id == 0 {
            continue;
        }
        ids.push(entry.actor_id);
        collision_count += 1;
    }

    let mut modifier_count = 0u32;
    for entry in state.modifiers.entries() {
        if ids.len() == slots {
            break;
        }
        if entry.actor_id == 0 {
            continue;
        }
        ids.push(entry.actor_id);
        modifier_count += 1;
    }

    let mut ignore_count = 0u32;
    for entry in state.ignores.entries() {
        if ids.len() == slots {
            break;
        }
        if entry.actor_id == 0 {
            continue;
        }
        ids.push(entry.actor_id);
        ignore_count += 1;
    }

    write_u32(
        &mut bytes,
        collision_count | modifier_count << 8 | ignore_count << 16,
    );
    for slot in 0..slots {
        write_u64(&mut bytes, ids.get(slot).copied().unwrap_or(0));
    }

    Ok(bytes)
}

/// Decodes a snapshot produced by [`write_state`] into `settings` and
/// `state`.
///
/// `settings.networked_interactions` and `settings.compress_network_position`
/// determine the expected layout and must match the encoding side; everything
/// else in the settings is overwritten from the wire. Decoded interaction
/// entries carry the networked actor id with an invalid collider handle,
/// resolved against the local scene by the caller.
pub fn read_state(
    data: &[u8],
    settings: &mut MoverSettings,
    state: &mut MoverState,
) -> Result<(), SnapshotError> {
    let mut data = data;

    let mut position = Vector::zeros();
    for axis in 0..3 {
        position[axis] = read_i32(&mut data)? as Real * POSITION_ACCURACY;
    }
    if !settings.compress_network_position {
        for axis in 0..3 {
            position[axis] += read_f32(&mut data)?;
        }
    }

    let pitch = read_f32(&mut data)?;
    let yaw = read_f32(&mut data)?;
    let flags = read_u32(&mut data)?;
    if flags & !FLAGS_USED_MASK != 0 {
        return Err(SnapshotError::Decode(format!(
            "unknown flag bits {:#x}",
            flags & !FLAGS_USED_MASK
        )));
    }

    let collision_layer_mask = read_u32(&mut data)?;
    let collider_layer = read_u32(&mut data)?;
    let radius = read_f32(&mut data)?;
    let height = read_f32(&mut data)?;
    let extent = read_f32(&mut data)?;

    let counts = read_u32(&mut data)?;
    if counts >> 24 != 0 {
        return Err(SnapshotError::Decode(format!(
            "malformed interaction count word {:#x}",
            counts
        )));
    }
    let collision_count = (counts & 0xff) as usize;
    let modifier_count = (counts >> 8 & 0xff) as usize;
    let ignore_count = (counts >> 16 & 0xff) as usize;
    let slots = settings.networked_interactions;
    if collision_count + modifier_count + ignore_count > slots {
        return Err(SnapshotError::Decode(format!(
            "interaction counts {}+{}+{} exceed {} slots",
            collision_count, modifier_count, ignore_count, slots
        )));
    }

    let mut ids = Vec::with_capacity(slots);
    for _ in 0..slots {
        ids.push(read_u64(&mut data)?);
    }

    if !data.is_empty() {
        return Err(SnapshotError::Decode("snapshot trailing bytes".into()));
    }

    state.base_position = position;
    state.desired_position = position;
    state.target_position = position;
    state.set_look(pitch, yaw);

    state.is_active = flags & FLAG_IS_ACTIVE != 0;
    state.is_grounded = flags & FLAG_IS_GROUNDED != 0;
    state.was_grounded = flags & FLAG_WAS_GROUNDED != 0;
    state.is_stepping_up = flags & FLAG_IS_STEPPING_UP != 0;
    state.was_stepping_up = flags & FLAG_WAS_STEPPING_UP != 0;
    state.is_snapping_to_ground = flags & FLAG_IS_SNAPPING != 0;
    state.was_snapping_to_ground = flags & FLAG_WAS_SNAPPING != 0;
    state.has_teleported = flags & FLAG_HAS_TELEPORTED != 0;
    state.jump_frames = (flags & FLAG_HAS_JUMPED != 0) as u32;

    settings.is_trigger = flags & FLAG_IS_TRIGGER != 0;
    settings.allow_client_teleports = flags & FLAG_CLIENT_TELEPORTS != 0;
    settings.shape = decode_shape(flags >> SHAPE_SHIFT & 0x3)?;
    settings.input_authority_behavior = decode_authority(flags >> INPUT_AUTHORITY_SHIFT & 0x3)?;
    settings.state_authority_behavior = decode_authority(flags >> STATE_AUTHORITY_SHIFT & 0x3)?;
    settings.proxy_interpolation_mode = decode_interpolation(flags >> INTERPOLATION_SHIFT & 0x3)?;
    settings.features = decode_features(flags >> FEATURES_SHIFT & 0x7);
    settings.collision_layer_mask = collision_layer_mask;
    settings.collider_layer = collider_layer;
    settings.radius = radius;
    settings.height = height;
    settings.extent = extent;

    state.collisions.clear();
    state.modifiers.clear();
    state.ignores.clear();
    let mut ids = ids.into_iter();
    for _ in 0..collision_count {
        if let Some(id) = ids.next() {
            state.collisions.add(ColliderHandle::invalid(), id);
        }
    }
    for _ in 0..modifier_count {
        if let Some(id) = ids.next() {
            state.modifiers.add(id);
        }
    }
    for _ in 0..ignore_count {
        if let Some(id) = ids.next() {
            state.ignores.add(ColliderHandle::invalid(), id, false);
        }
    }

    Ok(())
}

/// Builds the render descriptor between two historical states.
///
/// Positions are lerped, pitch is lerped, yaw takes the shorter way around
/// the circle. A travelled distance beyond `teleport_threshold` scaled by the
/// tick delta counts as a teleport: the target snaps to `to` and the real
/// velocity is zeroed instead of reporting an absurd speed. Otherwise the
/// real velocity is reconstructed from the travelled distance over the
/// covered time span.
pub fn interpolate(
    from: &MoverState,
    to: &MoverState,
    alpha: Real,
    settings: &MoverSettings,
    state: &mut MoverState,
) {
    let ticks = to.tick - from.tick;
    let difference = to.target_position - from.target_position;

    state.alpha = alpha;
    state.base_position = from.target_position;
    state.desired_position = to.target_position;
    state.target_position =
        mover_math::lerp_vector(from.target_position, to.target_position, alpha);
    state.set_look(
        mover_math::lerp(from.look_pitch(), to.look_pitch(), alpha),
        mover_math::interpolate_range(from.look_yaw(), to.look_yaw(), -180.0, 180.0, alpha),
    );

    if ticks <= 0 {
        state.real_velocity = Vector::zeros();
        state.real_speed = 0.0;
        return;
    }

    let tick_span = ticks as Real;
    let threshold = settings.teleport_threshold * tick_span;
    if difference.norm_squared() > threshold * threshold {
        state.has_teleported = true;
        state.target_position = to.target_position;
        state.real_velocity = Vector::zeros();
        state.real_speed = 0.0;
        return;
    }

    let time_span = to.update_delta_time * tick_span;
    if time_span > 0.0 {
        state.real_velocity = difference / time_span;
        state.real_speed = state.real_velocity.norm();
    } else {
        state.real_velocity = Vector::zeros();
        state.real_speed = 0.0;
    }
}

fn quantize_axis(value: Real) -> Result<i32, SnapshotError> {
    let scaled = (value / POSITION_ACCURACY).round();
    if !scaled.is_finite() || scaled < i32::MIN as Real || scaled > i32::MAX as Real {
        return Err(SnapshotError::Encode(format!(
            "position component {} out of range",
            value
        )));
    }
    Ok(scaled as i32)
}

fn pack_flags(state: &MoverState, settings: &MoverSettings) -> u32 {
    let mut flags = 0;

    if state.is_active {
        flags |= FLAG_IS_ACTIVE;
    }
    if state.is_grounded {
        flags |= FLAG_IS_GROUNDED;
    }
    if state.was_grounded {
        flags |= FLAG_WAS_GROUNDED;
    }
    if state.is_stepping_up {
        flags |= FLAG_IS_STEPPING_UP;
    }
    if state.was_stepping_up {
        flags |= FLAG_WAS_STEPPING_UP;
    }
    if state.is_snapping_to_ground {
        flags |= FLAG_IS_SNAPPING;
    }
    if state.was_snapping_to_ground {
        flags |= FLAG_WAS_SNAPPING;
    }
    if state.has_teleported {
        flags |= FLAG_HAS_TELEPORTED;
    }
    if state.jump_frames > 0 {
        flags |= FLAG_HAS_JUMPED;
    }

    if settings.is_trigger {
        flags |= FLAG_IS_TRIGGER;
    }
    if settings.allow_client_teleports {
        flags |= FLAG_CLIENT_TELEPORTS;
    }

    flags |= encode_shape(settings.shape) << SHAPE_SHIFT;
    flags |= encode_authority(settings.input_authority_behavior) << INPUT_AUTHORITY_SHIFT;
    flags |= encode_authority(settings.state_authority_behavior) << STATE_AUTHORITY_SHIFT;
    flags |= encode_interpolation(settings.proxy_interpolation_mode) << INTERPOLATION_SHIFT;
    flags |= encode_features(settings.features) << FEATURES_SHIFT;

    flags
}

fn encode_shape(shape: ActorShape) -> u32 {
    match shape {
        ActorShape::None => 0,
        ActorShape::Capsule => 1,
    }
}

fn decode_shape(value: u32) -> Result<ActorShape, SnapshotError> {
    match value {
        0 => Ok(ActorShape::None),
        1 => Ok(ActorShape::Capsule),
        _ => Err(SnapshotError::Decode(format!("unknown shape {}", value))),
    }
}

fn encode_authority(behavior: AuthorityBehavior) -> u32 {
    match behavior {
        AuthorityBehavior::InterpolateRender => 0,
        AuthorityBehavior::PredictRender => 1,
    }
}

fn decode_authority(value: u32) -> Result<AuthorityBehavior, SnapshotError> {
    match value {
        0 => Ok(AuthorityBehavior::InterpolateRender),
        1 => Ok(AuthorityBehavior::PredictRender),
        _ => Err(SnapshotError::Decode(format!(
            "unknown authority behavior {}",
            value
        ))),
    }
}

fn encode_interpolation(mode: InterpolationMode) -> u32 {
    match mode {
        InterpolationMode::Full => 0,
        InterpolationMode::Transform => 1,
    }
}

fn decode_interpolation(value: u32) -> Result<InterpolationMode, SnapshotError> {
    match value {
        0 => Ok(InterpolationMode::Full),
        1 => Ok(InterpolationMode::Transform),
        _ => Err(SnapshotError::Decode(format!(
            "unknown interpolation mode {}",
            value
        ))),
    }
}

fn encode_features(features: FeatureSet) -> u32 {
    features.ccd as u32 | (features.anti_jitter as u32) << 1 | (features.prediction_correction as u32) << 2
}

fn decode_features(value: u32) -> FeatureSet {
    FeatureSet {
        ccd: value & 1 != 0,
        anti_jitter: value & 2 != 0,
        prediction_correction: value & 4 != 0,
    }
}

fn write_i32(bytes: &mut Vec<u8>, value: i32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn write_u64(bytes: &mut Vec<u8>, value: u64) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn write_f32(bytes: &mut Vec<u8>, value: f32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn read_i32(data: &mut &[u8]) -> Result<i32, SnapshotError> {
    if data.len() < 4 {
        return Err(SnapshotError::Decode("unexpected eof".into()));
    }
    let value = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    *data = &data[4..];
    Ok(value)
}

fn read_u32(data: &mut &[u8]) -> Result<u32, SnapshotError> {
    if data.len() < 4 {
        return Err(SnapshotError::Decode("unexpected eof".into()));
    }
    let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    *data = &data[4..];
    Ok(value)
}

fn read_u64(data: &mut &[u8]) -> Result<u64, SnapshotError> {
    if data.len() < 8 {
        return Err(SnapshotError::Decode("unexpected eof".into()));
    }
    let value = u64::from_le_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ]);
    *data = &data[8..];
    Ok(value)
}

fn read_f32(data: &mut &[u8]) -> Result<f32, SnapshotError> {
    if data.len() < 4 {
        return Err(SnapshotError::Decode("unexpected eof".into()));
    }
    let value = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    *data = &data[4..];
    Ok(value)
}
