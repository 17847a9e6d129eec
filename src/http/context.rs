use axum::extract::FromRef;
use std::{ops::Deref, sync::Arc};

use crate::{config::Config, store::ExecutionStore, tasks::Orchestrator};

pub struct InnerWebContext {
    pub(crate) config: Config,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) store: Arc<dyn ExecutionStore>,
}

#[derive(Clone, FromRef)]
pub struct WebContext(pub(crate) Arc<InnerWebContext>);

impl Deref for WebContext {
    type Target = InnerWebContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WebContext {
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>) -> Self {
        let store = orchestrator.store().clone();
        Self(Arc::new(InnerWebContext {
            config,
            orchestrator,
            store,
        }))
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.0.orchestrator
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.0.store
    }
}
