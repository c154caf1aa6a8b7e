pub mod dataloader;
pub mod shard;

pub use dataloader::DataLoader;
pub use shard::{ShardSpec, shard_range};
