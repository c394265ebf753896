//! Topic registry: one `Topic` per group, created on first use.
//!
//! The registry is a concurrent map from `TopicId` to `Arc<Topic>`. Creating
//! a topic joins the group service; concurrent creators of the same id are
//! serialized on a per-id lock so exactly one join happens, while creators of
//! different ids never wait on each other.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use meshbridge_core::TopicId;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::RegistryError;
use crate::group::{GroupHandle, GroupService};

/// A named group and the socket currently bridged to it.
pub struct Topic {
    id: TopicId,
    group: Arc<dyn GroupHandle>,
    /// At most one bridged connection. Held only for the swap, never across I/O.
    active: Mutex<Option<ConnectionHandle>>,
    created_at: Instant,
}

impl Topic {
    fn new(id: TopicId, group: Arc<dyn GroupHandle>) -> Self {
        Self {
            id,
            group,
            active: Mutex::new(None),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &TopicId {
        &self.id
    }

    pub fn group(&self) -> &Arc<dyn GroupHandle> {
        &self.group
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Id of the bridged connection, if any.
    pub async fn active_connection(&self) -> Option<ConnectionId> {
        self.active.lock().await.as_ref().map(ConnectionHandle::id)
    }

    /// Install `handle` as the active connection, closing whatever it replaces.
    /// The close happens under the guard, so two pumps never share the topic.
    pub(crate) async fn install(&self, handle: ConnectionHandle) -> Option<ConnectionId> {
        let mut active = self.active.lock().await;
        let previous = active.replace(handle);
        if let Some(prev) = &previous {
            prev.close();
        }
        previous.map(|prev| prev.id())
    }

    /// Clear the active connection if it is still `id`. A pump calls this on
    /// exit; a newer connection installed meanwhile is left alone.
    pub(crate) async fn release(&self, id: ConnectionId) -> bool {
        let mut active = self.active.lock().await;
        match active.as_ref() {
            Some(current) if current.id() == id => {
                active.take();
                true
            }
            _ => false,
        }
    }

    /// Close the active connection, if any.
    pub async fn close(&self) {
        if let Some(handle) = self.active.lock().await.take() {
            handle.close();
        }
    }
}

/// Topic registry shared by the API and the bridge.
pub struct TopicRegistry {
    groups: Arc<dyn GroupService>,
    topics: DashMap<TopicId, Arc<Topic>>,
    /// Per-id join locks. Removed once the topic is inserted.
    joining: DashMap<TopicId, Arc<Mutex<()>>>,
}

impl TopicRegistry {
    pub fn new(groups: Arc<dyn GroupService>) -> Self {
        Self {
            groups,
            topics: DashMap::new(),
            joining: DashMap::new(),
        }
    }

    pub fn get(&self, id: &TopicId) -> Option<Arc<Topic>> {
        self.topics.get(id).map(|t| t.value().clone())
    }

    /// Return the topic for `id`, joining the group if this is the first use.
    pub async fn get_or_create(&self, id: &TopicId) -> Result<Arc<Topic>, RegistryError> {
        Ok(self.get_or_join(id).await?.0)
    }

    /// Create the topic for `id`. `None` when it already existed, so of any
    /// number of concurrent callers exactly one gets the topic back.
    pub async fn create(&self, id: &TopicId) -> Result<Option<Arc<Topic>>, RegistryError> {
        let (topic, created) = self.get_or_join(id).await?;
        Ok(created.then_some(topic))
    }

    /// The topic, and whether this call inserted it.
    async fn get_or_join(&self, id: &TopicId) -> Result<(Arc<Topic>, bool), RegistryError> {
        if let Some(topic) = self.get(id) {
            return Ok((topic, false));
        }

        let lock = self
            .joining
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another creator may have finished while we waited.
        if let Some(topic) = self.get(id) {
            return Ok((topic, false));
        }

        let group = match self.groups.join(id).await {
            Ok(group) => group,
            Err(source) => {
                // Drop the lock entry unless another caller is queued on it;
                // that caller retries the join under the same lock.
                self.joining
                    .remove_if(id, |_, l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) == 2);
                return Err(RegistryError::GroupJoin {
                    topic: id.clone(),
                    source,
                });
            }
        };

        let (topic, created) = match self.topics.entry(id.clone()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                let topic = Arc::new(Topic::new(id.clone(), group));
                e.insert(topic.clone());
                (topic, true)
            }
        };
        self.joining.remove(id);

        tracing::info!(topic = %id, created, "joined topic");
        Ok((topic, created))
    }

    /// Topic ids, sorted.
    pub fn list(&self) -> Vec<TopicId> {
        let mut ids: Vec<TopicId> = self.topics.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Close every bridged connection. Used on shutdown.
    pub async fn close_all(&self) {
        let topics: Vec<Arc<Topic>> = self.topics.iter().map(|e| e.value().clone()).collect();
        for topic in topics {
            topic.close().await;
        }
    }
}
