//! Composition root: wires storage, sequencing, buffering, fan-out,
//! membership and reconciliation into one running node.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use scribe_buffer::OperationBuffer;
use scribe_cluster::Coordinator;
use scribe_cluster::DocRouter;
use scribe_cluster::InstanceInfo;
use scribe_cluster::MembershipRegistry;
use scribe_index::Sequencer;
use scribe_pubsub::EditBus;
use scribe_pubsub::FanoutPublisher;
use scribe_pubsub::FanoutSubscriber;
use scribe_snapshot::CapturedStore;
use scribe_snapshot::ChangeFeed;
use scribe_snapshot::MemoryFeed;
use scribe_snapshot::Reconciler;
use scribe_storage::DocumentDirectory;
use scribe_storage::EditStore;
use scribe_storage::MemoryStore;
use scribe_storage::RedbStore;
use scribe_storage::SnapshotStore;
use scribe_storage::VersionVectorStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::session::SessionRegistry;

/// Everything a request handler needs.
pub struct AppState {
    pub instance: InstanceInfo,
    pub edits: Arc<dyn EditStore>,
    pub documents: Arc<dyn DocumentDirectory>,
    pub sequencer: Arc<Sequencer<dyn EditStore>>,
    pub buffer: Arc<OperationBuffer>,
    pub reconciler: Arc<Reconciler>,
    pub sessions: Arc<SessionRegistry>,
    pub membership: Arc<MembershipRegistry>,
    pub router: Arc<DocRouter>,
}

impl AppState {
    /// Wire a node against the given coordinator and bus, and spawn
    /// its background tasks: membership watch, fan-out subscriber,
    /// buffer ticker and the snapshot reconciler.
    ///
    /// Picks redb-backed storage when a data directory is configured,
    /// in-memory storage otherwise.
    pub async fn launch(
        config: &AppConfig,
        coordinator: Arc<dyn Coordinator>,
        bus: Arc<dyn EditBus>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        match &config.storage.data_dir {
            Some(data_dir) => {
                let db_path = data_dir.join("scribe.redb");
                let store =
                    Arc::new(RedbStore::open(&db_path).context("failed to open durable storage")?);
                info!(data_dir = %data_dir.display(), "using redb storage");
                Self::launch_with_store(config, store, coordinator, bus, shutdown).await
            }
            None => {
                info!("no data directory configured, using in-memory storage");
                let store = Arc::new(MemoryStore::new());
                Self::launch_with_store(config, store, coordinator, bus, shutdown).await
            }
        }
    }

    /// [`launch`] with an explicit storage backend. Tests use this to
    /// seed and inspect the store directly.
    ///
    /// [`launch`]: AppState::launch
    pub async fn launch_with_store<S>(
        config: &AppConfig,
        store: Arc<S>,
        coordinator: Arc<dyn Coordinator>,
        bus: Arc<dyn EditBus>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>>
    where
        S: EditStore
            + SnapshotStore
            + VersionVectorStore
            + DocumentDirectory
            + Send
            + Sync
            + 'static,
    {
        let instance = config.node.instance_info();

        // Appends flow through the capture wrapper so every durable
        // edit also reaches the reconciler's feed.
        let (feed, producer) = MemoryFeed::new();
        let edits: Arc<dyn EditStore> =
            Arc::new(CapturedStore::new(Arc::clone(&store), producer));

        let sequencer = Arc::new(Sequencer::new(Arc::clone(&edits), instance.id.as_str()));
        let publisher = FanoutPublisher::new(Arc::clone(&bus));
        let buffer = Arc::new(OperationBuffer::new(
            Arc::clone(&edits),
            publisher,
            config.buffer.buffer_config(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::clone(&store) as Arc<dyn VersionVectorStore>,
            Arc::clone(&edits),
        ));
        let sessions = Arc::new(SessionRegistry::new());

        let membership = MembershipRegistry::new(coordinator, instance.clone());
        let router = Arc::new(DocRouter::new());
        membership.subscribe(Arc::clone(&router) as _);
        Arc::clone(&membership).start(shutdown.clone()).await?;

        let subscriber = FanoutSubscriber::new(bus, Arc::clone(&sessions) as _);
        tokio::spawn(subscriber.run(shutdown.clone()));

        Arc::clone(&buffer).spawn_ticker(shutdown.clone());

        let feed: Arc<dyn ChangeFeed> = Arc::new(feed);
        tokio::spawn(Arc::clone(&reconciler).run(feed, shutdown));

        info!(
            instance_id = %instance.id,
            address = %instance.address(),
            "node launched"
        );
        Ok(Arc::new(Self {
            instance,
            edits,
            documents: store,
            sequencer,
            buffer,
            reconciler,
            sessions,
            membership,
            router,
        }))
    }
}
