use crate::consumer::Consumer;
use crate::producer::Producer;
use crate::registrar::GroupRegistrar;
use std::sync::Arc;
use tracing::debug;
use tributary_core::{
    config::{ClientConfig, ConsumerConfig},
    error::Result,
    traits::StreamLogClient,
    types::GroupStart,
};

/// Entry point binding a stream log to a group and consumer identity.
#[derive(Clone)]
pub struct StreamClient {
    log: Arc<dyn StreamLogClient>,
    config: ClientConfig,
}

impl StreamClient {
    pub fn new(log: Arc<dyn StreamLogClient>, config: ClientConfig) -> Self {
        Self { log, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<dyn StreamLogClient> {
        &self.log
    }

    /// Create a consumer with its own connection for blocking reads.
    pub async fn create_consumer(&self, config: ConsumerConfig) -> Result<Consumer> {
        config.validate()?;
        let reader = self.log.duplicate().await?;
        debug!(
            group = %self.config.group_name,
            consumer = %self.config.consumer_name,
            "Created consumer"
        );
        Ok(Consumer::new(
            self.log.clone(),
            reader,
            self.config.clone(),
            config,
        ))
    }

    pub fn create_producer(&self) -> Producer {
        Producer::new(self.log.clone())
    }

    /// Group registrar for this client's group
    pub fn registrar(&self, start: GroupStart) -> GroupRegistrar {
        GroupRegistrar::new(self.log.clone(), self.config.group_name.clone(), start)
    }
}
