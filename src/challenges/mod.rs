// Aggregates challenge detection, solving, and the resolution state machine.

pub mod core;
pub mod detectors;
pub mod pipeline;
pub mod solvers;
pub mod user_agents;
