//! Execution trace for stage and processor dispatch.
//!
//! The trace is a flat, reusable record buffer: every traced fixed move
//! rewinds the write cursor and overwrites the previous run in place, so a
//! steady-state mover allocates nothing. Records carry an expansion flag for
//! tree-style presentation; rewriting a slot with identical content keeps
//! that flag, so an inspector survives re-simulation without collapsing.

use collision_cache::CACHE_SIZE;

/// What a trace record describes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TraceKind {
    #[default]
    None,
    Stage,
    Processor,
}

/// One recorded stage or processor invocation.
#[derive(Clone, Debug, Default)]
pub struct TraceInfo {
    kind: TraceKind,
    name: &'static str,
    level: u32,
    is_visible: bool,
}

impl TraceInfo {
    pub fn kind(&self) -> TraceKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Nesting depth of the invocation. Stages started from the move loop
    /// report zero; a stage executed from within another stage reports the
    /// parent depth plus one.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_valid(&self) -> bool {
        self.kind != TraceKind::None
    }

    pub fn is_stage(&self) -> bool {
        self.kind == TraceKind::Stage
    }

    pub fn is_processor(&self) -> bool {
        self.kind == TraceKind::Processor
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    /// Expansion flag owned by whatever presents the trace as a tree.
    pub fn set_visible(&mut self, visible: bool) {
        self.is_visible = visible;
    }

    fn set(&mut self, kind: TraceKind, name: &'static str, level: u32) {
        if self.kind == kind && self.name == name && self.level == level {
            return;
        }

        self.kind = kind;
        self.name = name;
        self.level = level;
        self.is_visible = level == 0;
    }
}

/// Reusable record buffer for one mover.
///
/// Recording costs one branch when disabled. The buffer grows in
/// [`CACHE_SIZE`] chunks on demand and is never shrunk.
#[derive(Default)]
pub struct ExecutionTrace {
    enabled: bool,
    in_fixed_update: bool,
    count: usize,
    records: Vec<TraceInfo>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Records of the last traced fixed move, in execution order.
    pub fn records(&self) -> &[TraceInfo] {
        &self.records[..self.count]
    }

    pub fn records_mut(&mut self) -> &mut [TraceInfo] {
        &mut self.records[..self.count]
    }

    /// Rewinds the write cursor for a new fixed move. Stage records are only
    /// accepted between this call and [`Self::end_fixed_move`].
    pub fn begin_fixed_move(&mut self) {
        self.count = 0;
        self.in_fixed_update = true;
    }

    pub fn end_fixed_move(&mut self) {
        self.in_fixed_update = false;
    }

    /// Records a stage invocation. Returns `false` without touching the
    /// buffer when tracing is disabled or no fixed move is in progress;
    /// callers use the result to gate their per-processor traces.
    pub fn trace_stage(&mut self, name: &'static str, level: u32) -> bool {
        if !self.enabled || !self.in_fixed_update {
            return false;
        }

        self.push(TraceKind::Stage, name, level);
        true
    }

    /// Records a processor invocation. The fixed-move gate is inherited from
    /// the stage record that preceded it.
    pub fn trace_processor(&mut self, name: &'static str, level: u32) -> bool {
        if !self.enabled {
            return false;
        }

        self.push(TraceKind::Processor, name, level);
        true
    }

    /// Disables tracing and wipes all records.
    pub fn clear(&mut self) {
        self.enabled = false;
        self.in_fixed_update = false;
        self.count = 0;

        for record in &mut self.records {
            *record = TraceInfo::default();
        }
    }

    fn push(&mut self, kind: TraceKind, name: &'static str, level: u32) {
        if self.count >= self.records.len() {
            let grown = self.records.len() + CACHE_SIZE;
            self.records.resize_with(grown, TraceInfo::default);
        }

        self.records[self.count].set(kind, name, level);
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_trace_records_nothing() {
        let mut trace = ExecutionTrace::new();
        trace.begin_fixed_move();

        assert!(!trace.trace_stage("BeginMove", 0));
        assert!(!trace.trace_processor("environment", 0));
        assert!(trace.records().is_empty());
    }

    #[test]
    fn stage_records_require_fixed_move() {
        let mut trace = ExecutionTrace::new();
        trace.set_enabled(true);

        assert!(!trace.trace_stage("BeginMove", 0));

        trace.begin_fixed_move();
        assert!(trace.trace_stage("BeginMove", 0));

        trace.end_fixed_move();
        assert!(!trace.trace_stage("EndMove", 0));
        assert_eq!(trace.records().len(), 1);
    }

    #[test]
    fn begin_fixed_move_rewinds_the_cursor() {
        let mut trace = ExecutionTrace::new();
        trace.set_enabled(true);

        trace.begin_fixed_move();
        trace.trace_stage("BeginMove", 0);
        trace.trace_processor("environment", 0);
        trace.trace_stage("EndMove", 0);
        assert_eq!(trace.records().len(), 3);

        trace.begin_fixed_move();
        trace.trace_stage("BeginMove", 0);
        assert_eq!(trace.records().len(), 1);
        assert!(trace.records()[0].is_stage());
        assert_eq!(trace.records()[0].name(), "BeginMove");
    }

    #[test]
    fn identical_rewrite_preserves_visibility() {
        let mut trace = ExecutionTrace::new();
        trace.set_enabled(true);

        trace.begin_fixed_move();
        trace.trace_stage("BeginMove", 0);
        trace.records_mut()[0].set_visible(false);

        trace.begin_fixed_move();
        trace.trace_stage("BeginMove", 0);
        assert!(!trace.records()[0].is_visible());

        trace.begin_fixed_move();
        trace.trace_stage("PrepareData", 0);
        assert!(trace.records()[0].is_visible());
    }

    #[test]
    fn nested_records_start_collapsed() {
        let mut trace = ExecutionTrace::new();
        trace.set_enabled(true);
        trace.begin_fixed_move();

        trace.trace_stage("AfterMoveStep", 1);
        assert!(!trace.records()[0].is_visible());
    }

    #[test]
    fn buffer_grows_past_one_chunk() {
        let mut trace = ExecutionTrace::new();
        trace.set_enabled(true);
        trace.begin_fixed_move();

        let total = CACHE_SIZE * 2 + 3;
        for _ in 0..total {
            trace.trace_processor("environment", 0);
        }

        assert_eq!(trace.records().len(), total);
        assert!(trace.records().iter().all(|record| record.is_processor()));
    }

    #[test]
    fn clear_disables_and_invalidates() {
        let mut trace = ExecutionTrace::new();
        trace.set_enabled(true);
        trace.begin_fixed_move();
        trace.trace_stage("BeginMove", 0);

        trace.clear();

        assert!(!trace.is_enabled());
        assert!(trace.records().is_empty());
        assert!(!trace.trace_processor("environment", 0));
    }
}
