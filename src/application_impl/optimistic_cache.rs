use crate::application_port::ApiError;
use crate::domain_model::QueryKey;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// In-place change to a cached collection.
pub type Edit<T> = Arc<dyn Fn(&mut Vec<T>) + Send + Sync>;

pub fn edit<T, F>(f: F) -> Edit<T>
where
    F: Fn(&mut Vec<T>) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[async_trait::async_trait]
pub trait CollectionFetcher<T>: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<Vec<T>, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refetch {
    Applied,
    /// Cancelled or overtaken; the result was dropped.
    Superseded,
}

struct PendingEdit<T> {
    id: u64,
    edit: Edit<T>,
}

struct InFlight {
    cancel: CancellationToken,
}

/// What readers see is `base` with every pending edit applied in submission
/// order. Each submission owns exactly one pending edit, so a failure only
/// takes back its own change.
struct Collection<T> {
    base: Vec<T>,
    pending: Vec<PendingEdit<T>>,
    view: watch::Sender<Vec<T>>,
    generation: u64,
    in_flight: Option<InFlight>,
}

impl<T: Clone> Collection<T> {
    fn new() -> Self {
        let (view, _) = watch::channel(Vec::new());
        Collection {
            base: Vec::new(),
            pending: Vec::new(),
            view,
            generation: 0,
            in_flight: None,
        }
    }

    fn publish(&self) {
        let mut view = self.base.clone();
        for pending in &self.pending {
            (pending.edit)(&mut view);
        }
        self.view.send_replace(view);
    }

    fn cancel_refetch(&mut self) {
        self.generation += 1;
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.cancel();
        }
    }
}

struct CacheInner<T> {
    collections: DashMap<QueryKey, Collection<T>>,
    fetcher: Arc<dyn CollectionFetcher<T>>,
    next_submission: AtomicU64,
}

impl<T: Clone> CacheInner<T> {
    fn settle(&self, key: &QueryKey, id: u64, confirmed: Option<Edit<T>>) {
        let Some(mut collection) = self.collections.get_mut(key) else {
            return;
        };
        collection.pending.retain(|pending| pending.id != id);
        if let Some(confirmed) = confirmed {
            confirmed(&mut collection.base);
        }
        collection.publish();
    }
}

/// Rolls the submission back if its future is dropped before the write
/// resolves.
struct Submission<'a, T: Clone> {
    cache: &'a CacheInner<T>,
    key: &'a QueryKey,
    id: u64,
    armed: bool,
}

impl<T: Clone> Drop for Submission<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            debug!(key = %self.key, submission = self.id, "submission dropped, rolling back");
            self.cache.settle(self.key, self.id, None);
        }
    }
}

/// Keyed collections with speculative writes.
pub struct OptimisticCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for OptimisticCache<T> {
    fn clone(&self) -> Self {
        OptimisticCache {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> OptimisticCache<T> {
    pub fn new(fetcher: Arc<dyn CollectionFetcher<T>>) -> Self {
        OptimisticCache {
            inner: Arc::new(CacheInner {
                collections: DashMap::new(),
                fetcher,
                next_submission: AtomicU64::new(1),
            }),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Vec<T>> {
        self.inner
            .collections
            .get(key)
            .map(|collection| collection.view.borrow().clone())
    }

    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<Vec<T>> {
        self.inner
            .collections
            .entry(key.clone())
            .or_insert_with(Collection::new)
            .view
            .subscribe()
    }

    /// Replaces the server-side view of `key`.
    pub fn set(&self, key: &QueryKey, items: Vec<T>) {
        let mut collection = self
            .inner
            .collections
            .entry(key.clone())
            .or_insert_with(Collection::new);
        collection.base = items;
        collection.publish();
    }

    pub fn pending(&self, key: &QueryKey) -> usize {
        self.inner
            .collections
            .get(key)
            .map(|collection| collection.pending.len())
            .unwrap_or(0)
    }

    /// Drops every server-side view, e.g. after sign-out. Pending edits stay
    /// until their submissions resolve.
    pub fn clear(&self) {
        for mut collection in self.inner.collections.iter_mut() {
            collection.cancel_refetch();
            collection.base.clear();
            collection.publish();
        }
    }

    pub async fn refetch(&self, key: &QueryKey) -> Result<Refetch, ApiError> {
        let (generation, cancel) = {
            let mut collection = self
                .inner
                .collections
                .entry(key.clone())
                .or_insert_with(Collection::new);
            collection.cancel_refetch();
            let cancel = CancellationToken::new();
            collection.in_flight = Some(InFlight {
                cancel: cancel.clone(),
            });
            (collection.generation, cancel)
        };

        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%key, "refetch cancelled");
                return Ok(Refetch::Superseded);
            }
            fetched = self.inner.fetcher.fetch(key) => fetched,
        };

        let Some(mut collection) = self.inner.collections.get_mut(key) else {
            return Ok(Refetch::Superseded);
        };
        if collection.generation != generation {
            debug!(%key, "stale refetch result ignored");
            return Ok(Refetch::Superseded);
        }
        collection.in_flight = None;
        collection.base = fetched?;
        collection.publish();
        Ok(Refetch::Applied)
    }

    pub fn schedule_refetch(&self, key: QueryKey) {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.refetch(&key).await {
                warn!(%key, error = %e, "background refetch failed");
            }
        });
    }

    /// Shows `optimistic` to readers right away, then runs `write`.
    ///
    /// On success the edit returned by `write` is folded into the server-side
    /// view and a refetch is scheduled. On failure only this submission's edit
    /// is taken back and the error comes back as `MutationFailed`.
    pub async fn submit<O, W>(
        &self,
        key: &QueryKey,
        optimistic: Edit<T>,
        write: W,
    ) -> Result<O, ApiError>
    where
        W: Future<Output = Result<(O, Edit<T>), ApiError>> + Send,
        O: Send,
    {
        let id = self.inner.next_submission.fetch_add(1, Ordering::Relaxed);
        {
            let mut collection = self
                .inner
                .collections
                .entry(key.clone())
                .or_insert_with(Collection::new);
            collection.cancel_refetch();
            collection.pending.push(PendingEdit {
                id,
                edit: optimistic,
            });
            collection.publish();
        }
        debug!(%key, submission = id, "optimistic edit applied");

        let mut submission = Submission {
            cache: &self.inner,
            key,
            id,
            armed: true,
        };
        let outcome = write.await;
        submission.armed = false;

        match outcome {
            Ok((output, confirmed)) => {
                self.inner.settle(key, id, Some(confirmed));
                self.schedule_refetch(key.clone());
                Ok(output)
            }
            Err(e) => {
                warn!(%key, submission = id, error = %e, "write failed, rolled back");
                self.inner.settle(key, id, None);
                Err(ApiError::MutationFailed(Box::new(e)))
            }
        }
    }
}
