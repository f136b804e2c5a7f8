// Data structures shared by the store, orchestrators and the REST surface.

pub mod application;
pub mod cluster;
pub mod deployment;
pub mod state;
pub mod volume;

pub use application::*;
pub use cluster::*;
pub use deployment::*;
pub use state::*;
pub use volume::*;
