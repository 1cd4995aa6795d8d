//! Collective operations across mesh partitions.

/// The collective operations the time loop and the operator rely on.
///
/// Every rank owns a contiguous shard of each field. Reductions combine the per-rank partial
/// results, and the barrier guarantees that no rank observes a half-updated global state.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn barrier(&self);

    fn all_reduce_sum(&self, local: f64) -> f64;
}

/// A single-rank communicator.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce_sum(&self, local: f64) -> f64 {
        local
    }
}
