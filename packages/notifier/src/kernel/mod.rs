//! Infrastructure: queue publishing, the single-flight guard, and cycle
//! orchestration.

pub mod cycle;
pub mod guard;
pub mod queue;
