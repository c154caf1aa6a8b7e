mod adamw;
mod clip;
mod linear;

pub use adamw::AdamW;
pub use clip::clip_grad_norm;
pub use linear::LinearSchedule;
