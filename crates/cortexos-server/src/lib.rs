//! HTTP surface for CortexOS: submit a run, stream its progress over
//! SSE, and accept signed webhooks that trigger a run (spec.md §6).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use cortexos_core::Engine;
use cortexos_bus::StreamController;
use cortexos_types::ExecutionResult;

mod http;

pub use http::{app_router, serve};

/// One in-flight or finished run: its event stream and, once the
/// pipeline returns, its final result.
pub struct RunHandle {
    pub stream: Arc<StreamController>,
    pub result: RwLock<Option<ExecutionResult>>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub runs: Arc<RwLock<HashMap<String, Arc<RunHandle>>>>,
    pub webhook_path: String,
    pub webhook_secret: Option<Vec<u8>>,
}

impl AppState {
    pub fn new(engine: Engine, webhook_path: impl Into<String>, webhook_secret: Option<Vec<u8>>) -> Self {
        Self {
            engine,
            runs: Arc::new(RwLock::new(HashMap::new())),
            webhook_path: webhook_path.into(),
            webhook_secret,
        }
    }
}
