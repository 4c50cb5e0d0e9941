use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqx_metadata::{ConnectionConfig, Environment, MetadataError, TransportType};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::{PublishError, TransportError};
use crate::memory::InMemoryTransport;
use crate::nats::NatsTransport;
use crate::publisher::{DurablePublisher, PubManager};
use crate::transport::Transport;

/// Error creating middleware
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("configuration error: {0}")]
    Config(#[from] MetadataError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("publisher error: {0}")]
    Publish(#[from] PublishError),
}

/// Builds transports and publishers from the environment document
pub struct MiddlewareFactory;

impl MiddlewareFactory {
    /// Control-plane transport on `nats.url`
    pub async fn create_transport(env: &Environment) -> Result<Arc<dyn Transport>, FactoryError> {
        match env.nats.transport {
            TransportType::Memory => Ok(Arc::new(InMemoryTransport::new())),
            TransportType::Nats => {
                let transport = NatsTransport::connect(&env.nats.url)
                    .await?
                    .with_request_timeout(Duration::from_secs(env.nats.request_timeout_secs));
                Ok(Arc::new(transport))
            }
        }
    }

    /// One durable publisher per `nats.publishers` entry.
    ///
    /// Endpoints on the same server and credentials share one connection.
    /// With the memory transport every publisher writes through `control`.
    pub async fn create_pub_manager(
        env: &Environment,
        control: Arc<dyn Transport>,
        cancel: &CancellationToken,
    ) -> Result<PubManager, FactoryError> {
        let mut connections: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        let mut publishers = Vec::new();

        for config in env.nats.publisher_configs()? {
            let transport = match env.nats.transport {
                TransportType::Memory => Arc::clone(&control),
                TransportType::Nats => {
                    let key = connection_key(&config);
                    match connections.get(&key) {
                        Some(transport) => Arc::clone(transport),
                        None => {
                            let transport: Arc<dyn Transport> = Arc::new(
                                NatsTransport::connect_with(&config).await?.with_request_timeout(
                                    Duration::from_secs(env.nats.request_timeout_secs),
                                ),
                            );
                            connections.insert(key, Arc::clone(&transport));
                            transport
                        }
                    }
                }
            };
            publishers.push(
                DurablePublisher::start(transport, &config, Backoff::default(), cancel).await?,
            );
        }

        Ok(PubManager::new(publishers))
    }
}

fn connection_key(config: &ConnectionConfig) -> String {
    format!(
        "{}|{}|{}",
        config.server_url(),
        config.username.as_deref().unwrap_or_default(),
        config.password.as_deref().unwrap_or_default()
    )
}
