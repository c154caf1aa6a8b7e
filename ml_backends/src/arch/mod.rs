mod bag;
pub mod loss;

pub use bag::{BagConfig, BagOfEmbeddings, CONFIG_FILE, WEIGHTS_FILE};
