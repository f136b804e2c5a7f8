// DataInfraPilot backend library. Modules are exported so the integration
// tests can exercise them directly.

pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod helm;
pub mod kube;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod remote;
pub mod render;
pub mod store;

use std::sync::Arc;

pub use config::Config;
pub use error::{ApiError, ApiResult};

use catalog::Catalog;
use orchestrator::Orchestrator;
use render::Renderer;
use store::Store;

/// Shared service bundle: everything the handlers and the cluster workers
/// need to do their job.
pub struct Services {
    pub config: Config,
    pub store: Store,
    pub catalog: Catalog,
    pub renderer: Renderer,
}

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub orchestrator: Arc<Orchestrator>,
}
