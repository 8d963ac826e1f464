mod cluster_builder;
mod cluster_error;
mod cluster_handle;
mod cluster_state;
mod cluster_sync;

pub use cluster_builder::*;
pub use cluster_error::*;
pub use cluster_handle::*;
