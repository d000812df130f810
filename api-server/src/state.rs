use std::sync::Arc;

use crate::delivery::Dispatcher;
use crate::store::MailStore;
use crate::threading::ThreadingConfig;

/// Shared handles managed by Rocket and handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MailStore>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub threading: ThreadingConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MailStore>,
        dispatcher: Arc<dyn Dispatcher>,
        threading: ThreadingConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            threading,
        }
    }
}
