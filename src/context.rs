use std::sync::Arc;

use crate::config::Config;
use crate::handlers::dispatch::DispatchTable;
use crate::store::AccountStore;

/// Application context containing shared dependencies. Explicitly
/// constructed and threaded through task construction; there is no
/// process-wide registry.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn AccountStore>,
    pub config: Arc<Config>,
    pub dispatch: Arc<DispatchTable>,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn AccountStore>,
        config: Arc<Config>,
        dispatch: Arc<DispatchTable>,
    ) -> Self {
        Self {
            store,
            config,
            dispatch,
        }
    }
}
