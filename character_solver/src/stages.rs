//! Stage pipeline dispatching gameplay processors at fixed points of a
//! predicted move.
//!
//! Processors are the extension seam of the solver: gravity, input-driven
//! acceleration, step-up and ground snapping all live outside the core loop
//! and hook into it through the four [`Stage`]s. Within one stage processors
//! run in descending priority, stable for equal priorities, and can suppress
//! processors that have not run yet. All scene access goes through the
//! [`StageContext`], which applies the mover's layer mask and ignore list to
//! every query.

use collision_cache::{OverlapInfo, SceneQuery, SweepInfo, TriggerInteraction};
use mover_state::{Collision, MoverSettings, MoverState};
use rapier3d::math::Vector;
use rapier3d::prelude::{Real, RigidBodyHandle};

use crate::depenetration;
use crate::resolver::CorrectionResolver;
use crate::trace::ExecutionTrace;
use crate::HitsOverlapQuery;

/// Fixed points of a predicted move at which processors run.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    /// Start of the move, before any state bookkeeping.
    BeginMove,
    /// Input and velocities are about to be turned into a position delta.
    PrepareData,
    /// One move step finished resolving penetration; runs once per CCD
    /// sub-step.
    AfterMoveStep,
    /// The move finished and the epilogue computed the real velocity.
    EndMove,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::BeginMove => "BeginMove",
            Stage::PrepareData => "PrepareData",
            Stage::AfterMoveStep => "AfterMoveStep",
            Stage::EndMove => "EndMove",
        }
    }
}

/// Family a processor belongs to, used for group suppression.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ProcessorGroup {
    Environment,
    StepUp,
    GroundSnap,
    #[default]
    Other,
}

impl ProcessorGroup {
    pub fn bit(self) -> u32 {
        match self {
            ProcessorGroup::Environment => 1,
            ProcessorGroup::StepUp => 1 << 1,
            ProcessorGroup::GroundSnap => 1 << 2,
            ProcessorGroup::Other => 1 << 3,
        }
    }
}

/// Gameplay hook invoked at the fixed stages of a move.
///
/// The default stage implementations do nothing; a processor overrides only
/// the stages it cares about. Stage methods receive the live fixed-tick state
/// through the context and may mutate it freely. The interaction hooks at the
/// bottom run outside stage execution and see the state directly.
pub trait MoverProcessor {
    /// Display name used by the execution trace.
    fn name(&self) -> &'static str;

    /// Processors run in descending priority within each stage; equal
    /// priorities keep their submission order.
    fn priority(&self) -> i32 {
        0
    }

    fn group(&self) -> ProcessorGroup {
        ProcessorGroup::Other
    }

    /// Evaluated once per stage; inactive processors are skipped entirely.
    fn is_active(&self, _settings: &MoverSettings, _state: &MoverState) -> bool {
        true
    }

    fn begin_move(&mut self, _ctx: &mut StageContext<'_>) {}

    fn prepare_data(&mut self, _ctx: &mut StageContext<'_>) {}

    fn after_move_step(&mut self, _ctx: &mut StageContext<'_>) {}

    fn end_move(&mut self, _ctx: &mut StageContext<'_>) {}

    /// A tracked collision appeared.
    fn on_enter(&mut self, _state: &mut MoverState, _collision: &Collision) {}

    /// A tracked collision disappeared.
    fn on_exit(&mut self, _state: &mut MoverState, _collision: &Collision) {}

    /// Runs once at the end of every predicted move.
    fn on_stay(&mut self, _state: &mut MoverState) {}

    /// Runs after interpolation produced the render state.
    fn on_interpolate(&mut self, _state: &mut MoverState) {}
}

/// Everything a processor may touch during one stage execution.
///
/// Scene queries made through the context carry the mover's collision layer
/// mask, its own body exclusion and the ignore list, so a processor cannot
/// accidentally collide with the actor itself.
pub struct StageContext<'a> {
    pub scene: &'a mut dyn SceneQuery,
    pub settings: &'a MoverSettings,
    /// Live fixed-tick state of the move in progress.
    pub state: &'a mut MoverState,
    pub resolver: &'a mut CorrectionResolver,
    /// Hits collected by the step that just resolved. Empty outside
    /// [`Stage::AfterMoveStep`].
    pub step_overlap: &'a OverlapInfo,
    exclude_body: Option<RigidBodyHandle>,
    stage: Stage,
    suppressed_groups: u32,
    remaining_suppressed: bool,
    hit_refresh: Option<HitsOverlapQuery>,
}

impl<'a> StageContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: Stage,
        scene: &'a mut dyn SceneQuery,
        settings: &'a MoverSettings,
        state: &'a mut MoverState,
        resolver: &'a mut CorrectionResolver,
        step_overlap: &'a OverlapInfo,
        exclude_body: Option<RigidBodyHandle>,
    ) -> Self {
        Self {
            scene,
            settings,
            state,
            resolver,
            step_overlap,
            exclude_body,
            stage,
            suppressed_groups: 0,
            remaining_suppressed: false,
            hit_refresh: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Skips every processor of `group` that has not run yet in this stage.
    pub fn suppress_group(&mut self, group: ProcessorGroup) {
        self.suppressed_groups |= group.bit();
    }

    /// Skips every processor that has not run yet in this stage.
    pub fn suppress_remaining(&mut self) {
        self.remaining_suppressed = true;
    }

    /// Asks the mover to refresh the tracked hits after the current
    /// [`Stage::AfterMoveStep`] finishes. `force_new` discards the reusable
    /// overlap and queries the scene again; once forced it stays forced for
    /// the rest of the stage.
    pub fn request_hit_refresh(&mut self, force_new: bool) {
        if force_new {
            self.hit_refresh = Some(HitsOverlapQuery::New);
        } else if self.hit_refresh.is_none() {
            self.hit_refresh = Some(HitsOverlapQuery::Default);
        }
    }

    pub fn hit_refresh(&self) -> Option<HitsOverlapQuery> {
        self.hit_refresh
    }

    /// Overlaps a capsule standing at `position` (feet point) against the
    /// scene.
    pub fn capsule_overlap(
        &mut self,
        overlap: &mut OverlapInfo,
        position: Vector<Real>,
        radius: Real,
        height: Real,
        extent: Real,
        trigger_interaction: TriggerInteraction,
    ) {
        overlap.set_query(
            position,
            radius,
            height,
            extent,
            self.settings.collision_layer_mask,
            trigger_interaction,
        );
        overlap.exclude_body = self.exclude_body;
        for ignore in self.state.ignores.entries() {
            overlap.ignored_colliders.push(ignore.collider);
        }

        self.scene.overlap_capsule(overlap);
    }

    /// Sweeps a sphere centered at `center` along `direction`, sorting the
    /// hits by distance.
    pub fn sphere_sweep(
        &mut self,
        sweep: &mut SweepInfo,
        center: Vector<Real>,
        radius: Real,
        direction: Vector<Real>,
        max_distance: Real,
        trigger_interaction: TriggerInteraction,
    ) {
        // A capsule of height 2r is a sphere; the scene takes feet points.
        let bottom = center - Vector::new(0.0, radius, 0.0);

        sweep.set_query(
            bottom,
            radius,
            radius * 2.0,
            0.0,
            direction,
            max_distance,
            self.settings.collision_layer_mask,
            trigger_interaction,
        );
        sweep.exclude_body = self.exclude_body;
        for ignore in self.state.ignores.entries() {
            sweep.ignored_colliders.push(ignore.collider);
        }

        self.scene.sweep_capsule(sweep);
        sweep.sort_hits();
    }

    /// Depenetrates `target_position` from the hits in `overlap` and
    /// refreshes the grounding state, reusing the mover's shared resolver.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_penetration(
        &mut self,
        overlap: &mut OverlapInfo,
        base_position: Vector<Real>,
        target_position: Vector<Real>,
        probe_grounding: bool,
        max_steps: u32,
        resolver_iterations: u32,
        resolve_triggers: bool,
    ) -> Vector<Real> {
        depenetration::resolve_penetration(
            &mut *self.scene,
            self.settings,
            self.resolver,
            overlap,
            self.state,
            base_position,
            target_position,
            probe_grounding,
            max_steps,
            resolver_iterations,
            resolve_triggers,
        )
    }
}

/// Dispatches processors for one stage, reusing its ordering scratch across
/// stages and moves.
#[derive(Default)]
pub struct StageExecutor {
    order: Vec<usize>,
    priorities: Vec<i32>,
}

impl StageExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every active processor for the context's stage, highest priority
    /// first.
    pub fn execute(
        &mut self,
        processors: &mut [Box<dyn MoverProcessor>],
        ctx: &mut StageContext<'_>,
        trace: &mut ExecutionTrace,
    ) {
        self.order.clear();
        self.priorities.clear();

        for (index, processor) in processors.iter().enumerate() {
            if processor.is_active(ctx.settings, ctx.state) {
                self.order.push(index);
                self.priorities.push(processor.priority());
            }
        }

        // Bubble passes keep equal priorities in submission order.
        if self.order.len() > 1 {
            let mut is_sorted = false;
            while !is_sorted {
                is_sorted = true;
                for slot in 1..self.order.len() {
                    if self.priorities[slot - 1] < self.priorities[slot] {
                        self.priorities.swap(slot - 1, slot);
                        self.order.swap(slot - 1, slot);
                        is_sorted = false;
                    }
                }
            }
        }

        let trace_processors = trace.trace_stage(ctx.stage.name(), 0);

        for slot in 0..self.order.len() {
            if ctx.remaining_suppressed {
                break;
            }

            let processor = &mut processors[self.order[slot]];
            if ctx.suppressed_groups & processor.group().bit() != 0 {
                continue;
            }

            if trace_processors {
                trace.trace_processor(processor.name(), 0);
            }

            match ctx.stage {
                Stage::BeginMove => processor.begin_move(ctx),
                Stage::PrepareData => processor.prepare_data(ctx),
                Stage::AfterMoveStep => processor.after_move_step(ctx),
                Stage::EndMove => processor.end_move(ctx),
            }
        }
    }
}

/// Runs the per-move stay hook over every processor.
pub(crate) fn invoke_on_stay(
    processors: &mut [Box<dyn MoverProcessor>],
    state: &mut MoverState,
    trace: &mut ExecutionTrace,
) {
    let trace_processors = trace.trace_stage("OnStay", 0);

    for processor in processors.iter_mut() {
        if trace_processors {
            trace.trace_processor(processor.name(), 0);
        }

        processor.on_stay(state);
    }
}

/// Runs the post-interpolation hook over every processor.
pub(crate) fn invoke_on_interpolate(
    processors: &mut [Box<dyn MoverProcessor>],
    state: &mut MoverState,
    trace: &mut ExecutionTrace,
) {
    let trace_processors = trace.trace_stage("OnInterpolate", 0);

    for processor in processors.iter_mut() {
        if trace_processors {
            trace.trace_processor(processor.name(), 0);
        }

        processor.on_interpolate(state);
    }
}
