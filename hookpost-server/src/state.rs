//! State shared between the scheduler and the reload handler.

use crate::config::runtime::{LoadedConfig, ScheduleSettings};
use hookpost_core::processors::{DispatchError, Dispatcher};
use hookpost_core::repository::WebhookRepository;
use std::sync::Arc;
use tokio::sync::watch;

/// A dispatcher together with the cadence it runs at. Rebuilt on reload.
pub struct DeliveryRuntime {
    pub dispatcher: Dispatcher,
    pub schedule: ScheduleSettings,
}

impl DeliveryRuntime {
    pub fn build(
        repository: Arc<dyn WebhookRepository>,
        config: LoadedConfig,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            dispatcher: Dispatcher::new(repository, config.signer, config.policy)?,
            schedule: config.schedule,
        })
    }
}

/// Cheap to clone. The current runtime is published over a watch channel so
/// a reload takes effect at the scheduler's next tick, while a batch already
/// running finishes on the runtime it started with.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn WebhookRepository>,
    runtime: Arc<watch::Sender<Arc<DeliveryRuntime>>>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn WebhookRepository>,
        config: LoadedConfig,
    ) -> Result<Self, DispatchError> {
        let runtime = DeliveryRuntime::build(repository.clone(), config)?;
        let (tx, _rx) = watch::channel(Arc::new(runtime));
        Ok(Self {
            repository,
            runtime: Arc::new(tx),
        })
    }

    pub fn runtime(&self) -> Arc<DeliveryRuntime> {
        self.runtime.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DeliveryRuntime>> {
        self.runtime.subscribe()
    }

    /// Rebuild the runtime from a freshly loaded configuration.
    pub fn update_config(&self, config: LoadedConfig) -> Result<(), DispatchError> {
        let runtime = DeliveryRuntime::build(self.repository.clone(), config)?;
        self.runtime.send_replace(Arc::new(runtime));
        Ok(())
    }
}
