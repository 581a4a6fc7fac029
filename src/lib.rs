//! Driver samples for the i.MX6ULL "alpha" board on a small portable kernel core.
//!
//! The kernel services a driver talks to (GPIO, IRQ, timers, wait queues, signals, I2C/SPI,
//! input, the DeviceTree) live under `base` and `driver`. The sample drivers themselves are in
//! `driver` next to the subsystems they use, and `sim` wires everything to a simulated board.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate log;
extern crate static_assertions as sa;
extern crate alloc;

#[macro_use]
pub mod macros;
pub mod util;
pub mod logk;

pub mod base;
pub mod init;
pub mod dev;
pub mod driver;
pub mod fs;
pub mod sim;
