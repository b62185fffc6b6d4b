//! Process-wide plumbing shared by the mover crates: a replaceable log sink
//! and a sticky anomaly cell for headless runs.
#![forbid(unsafe_code)]

pub mod anomaly;
pub mod logging;
