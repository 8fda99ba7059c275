//! CPU compute device.
//!
//! Kernels are data-parallel closures run with rayon over typed buffers.
//! Launches go through an in-order [`ComputeQueue`], so the submission order
//! is the execution order and no extra synchronisation is needed between
//! dependent stages.
//!
//! - [`buffer`] - allocation against device limits, ping-pong halves
//! - [`output`] - float4 accumulation buffer with atomic or plain adds
//! - [`compact`] - prefix-sum stream compaction
//! - [`queue`] - kernel names and the launch log

pub mod buffer;
pub mod output;
pub mod compact;
pub mod queue;

pub use buffer::{Allocator, DeviceLimits, Parity, PingPong};
pub use output::{AccumulateMode, OutputBuffer};
pub use compact::compact;
pub use queue::{ComputeQueue, Kernel, LaunchRecord};
