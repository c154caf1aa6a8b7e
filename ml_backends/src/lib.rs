pub mod arch;
pub mod dist;
pub mod metrics;
pub mod processors;
pub mod tokenization;

pub use arch::{BagConfig, BagOfEmbeddings};
pub use dist::{DistributedModel, ThreadGroup};
pub use metrics::GlueMetrics;
pub use processors::GlueTsvReader;
pub use tokenization::HashingTokenizer;
