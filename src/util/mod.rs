//! Small helpers shared by the subsystems.

pub mod align;
pub mod bit;
