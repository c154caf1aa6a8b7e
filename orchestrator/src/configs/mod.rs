mod adapter;
mod run;

pub use adapter::{Adapter, BackendSpec, RunSpec};
pub use run::RunConfig;
