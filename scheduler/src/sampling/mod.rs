mod sampler;
mod weights;

pub use sampler::{MultiTaskSampler, performance_gaps};
pub use weights::SamplingWeightTable;
