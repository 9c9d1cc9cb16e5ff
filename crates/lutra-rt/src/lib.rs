//! Real-time-safe primitives for lutra plugin hosting.
//!
//! Two pieces:
//!
//! - [`RingBuffer`]: fixed-capacity SPSC byte queue with framed,
//!   all-or-nothing reads and writes.
//! - [`WorkQueue`]/[`Worker`]: a deferred-work bridge letting real-time
//!   code hand computation to a background thread and collect the results
//!   on later audio blocks, without blocking or allocating on the
//!   real-time path.

pub mod ring;
pub mod work;

pub use ring::RingBuffer;
pub use work::{WorkError, WorkHandler, WorkQueue, WorkResponder, WorkScheduler, Worker};
