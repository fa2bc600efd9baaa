//! Low-level helpers shared by workers and the runner

pub mod buffer;
pub mod fast_time;
pub mod time;
