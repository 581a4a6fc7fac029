//! Core kernel services the drivers are written against.

pub mod error;
pub mod sync;
pub mod time;
pub mod timer;
pub mod wait;
pub mod task;
pub mod poll;
pub mod irq;
pub mod delay;
