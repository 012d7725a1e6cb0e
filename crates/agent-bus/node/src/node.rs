//! Wiring of store, bus and orchestrator into one running node

use crate::{NodeConfig, NodeError, NodeResult, StorageConfig};
use agent_bus_runtime::{AgentBus, BusResult};
use agent_bus_store::{InMemoryStore, PersistenceSink};
use agent_bus_transport::{InMemoryBroker, PubSubTransport};
use std::sync::Arc;
use tokio::task::JoinHandle;
use workflow_engine::WorkflowOrchestrator;

/// A running node. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the listener task running until the runtime stops.
pub struct AgentNode {
    config: NodeConfig,
    broker: InMemoryBroker,
    store: Arc<dyn PersistenceSink>,
    bus: AgentBus,
    orchestrator: WorkflowOrchestrator,
    listener: JoinHandle<BusResult<()>>,
}

impl AgentNode {
    /// Build the configured store and start a node on a fresh broker
    pub async fn start(config: NodeConfig) -> NodeResult<Self> {
        let store = build_store(&config.storage).await?;
        let broker = InMemoryBroker::with_capacity(config.bus.channel_capacity);
        Self::start_with(config, broker, store).await
    }

    /// Start a node on an existing broker and store
    pub async fn start_with(
        config: NodeConfig,
        broker: InMemoryBroker,
        store: Arc<dyn PersistenceSink>,
    ) -> NodeResult<Self> {
        let transport: Arc<dyn PubSubTransport> = Arc::new(broker.connection());
        let bus = AgentBus::new(transport, Some(store.clone()), config.bus.clone());
        bus.connect().await?;
        let listener = bus.spawn_listener();

        let orchestrator =
            WorkflowOrchestrator::new(bus.clone(), store.clone(), config.orchestrator.clone());
        orchestrator.start().await?;

        tracing::info!(
            orchestrator = %config.orchestrator.agent_id,
            storage = storage_kind(&config.storage),
            "Agent node started"
        );

        Ok(Self {
            config,
            broker,
            store,
            bus,
            orchestrator,
            listener,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn bus(&self) -> &AgentBus {
        &self.bus
    }

    pub fn orchestrator(&self) -> &WorkflowOrchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<dyn PersistenceSink> {
        &self.store
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// A new connected and listening bus on this node's broker, sharing
    /// its store, for an agent hosted in the same process
    pub async fn agent_bus(&self) -> NodeResult<AgentBus> {
        let transport: Arc<dyn PubSubTransport> = Arc::new(self.broker.connection());
        let bus = AgentBus::new(transport, Some(self.store.clone()), self.config.bus.clone());
        bus.connect().await?;
        bus.spawn_listener();
        Ok(bus)
    }

    /// Wait for running executions, then disconnect and join the listener
    pub async fn shutdown(self) -> NodeResult<()> {
        let finished = self.orchestrator.wait_all().await;
        tracing::info!(executions = finished.len(), "Executions drained");

        self.bus.disconnect().await?;
        match self.listener.await {
            Ok(result) => result?,
            Err(e) => return Err(NodeError::Listener(e.to_string())),
        }

        tracing::info!("Agent node stopped");
        Ok(())
    }
}

fn storage_kind(storage: &StorageConfig) -> &'static str {
    match storage {
        StorageConfig::Memory => "memory",
        StorageConfig::Postgres { .. } => "postgres",
    }
}

async fn build_store(storage: &StorageConfig) -> NodeResult<Arc<dyn PersistenceSink>> {
    match storage {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = agent_bus_store::PostgresStore::connect(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(NodeError::UnsupportedStorage("postgres")),
    }
}
