#![forbid(unsafe_code)]

use std::sync::Arc;

use cmp_storage::complaints::ComplaintRepository;
use cmp_storage::credential::{CredentialScheme, PlaintextScheme};
use cmp_storage::directory::Directory;
use cmp_storage::notify::{ChangeHub, ChangeListener, SubscriptionId};
use cmp_storage::store::{EntityStore, MemoryStore};

use crate::analytics::QueryView;
use crate::clock::{Clock, SystemClock};
use crate::lifecycle::LifecycleEngine;

/// One store, one hub, one clock and one credential scheme wired into the
/// directory, the lifecycle engine and the query view.
#[derive(Debug)]
pub struct ComplaintPortal {
    hub: Arc<ChangeHub>,
    directory: Arc<Directory>,
    engine: LifecycleEngine,
    queries: QueryView,
}

impl ComplaintPortal {
    pub fn new(
        store: Arc<dyn EntityStore>,
        scheme: Arc<dyn CredentialScheme>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hub = Arc::new(ChangeHub::new());
        let directory = Arc::new(Directory::new(store.clone(), hub.clone(), scheme));
        let repo = Arc::new(ComplaintRepository::new(store, hub.clone()));
        Self {
            engine: LifecycleEngine::new(repo.clone(), directory.clone(), clock),
            queries: QueryView::new(repo),
            directory,
            hub,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(PlaintextScheme),
            Arc::new(SystemClock),
        )
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    pub fn queries(&self) -> &QueryView {
        &self.queries
    }

    /// Listener runs synchronously after every successful user or complaint write.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        self.hub.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }
}
