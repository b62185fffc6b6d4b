//! Default gameplay processors for the character solver.
//!
//! Three processors cover the baseline locomotion feel: [`EnvironmentProcessor`]
//! turns input and gravity into velocities, [`StepUpProcessor`] lifts the
//! mover over low obstacles that block horizontal movement, and
//! [`GroundSnapProcessor`] keeps it glued to the ground over small drops and
//! convex edges. Their priorities (1000, -1000, -2000) order them so velocity
//! preparation runs first in every stage and the positional fix-ups run after
//! everything else.
//!
//! All three derive their values from the fixed-tick state only, so a move
//! replayed from the same state is bitwise identical.

#![forbid(unsafe_code)]

mod environment;
mod ground_snap;
mod step_up;

pub use environment::EnvironmentProcessor;
pub use ground_snap::GroundSnapProcessor;
pub use step_up::StepUpProcessor;

use character_solver::MoverProcessor;

/// The default processor set, in submission order.
pub fn default_processors() -> Vec<Box<dyn MoverProcessor>> {
    vec![
        Box::new(EnvironmentProcessor::default()),
        Box::new(StepUpProcessor::default()),
        Box::new(GroundSnapProcessor::default()),
    ]
}
