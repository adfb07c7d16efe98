pub mod routes;
mod websocket;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::lifecycle::LifecycleScheduler;
use crate::session::SessionRegistry;

/// Shared handles passed to every route
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<LifecycleScheduler>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

pub use routes::routes;
