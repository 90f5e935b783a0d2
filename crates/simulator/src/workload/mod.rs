//! Workload generation for simulations.
//!
//! Provides request generators for driving a topology under load.

mod mixed;

pub use mixed::MixedWorkload;

use sysdesign_types::Request;

/// Trait for generating request workloads.
pub trait WorkloadGenerator {
    /// Generate a single request.
    fn generate_one(&mut self, rng: &mut impl rand::Rng) -> Request;

    /// Generate a batch of requests.
    fn generate_batch(&mut self, count: usize, rng: &mut impl rand::Rng) -> Vec<Request> {
        (0..count).map(|_| self.generate_one(&mut *rng)).collect()
    }
}
