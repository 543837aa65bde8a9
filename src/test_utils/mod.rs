//! In-memory fakes for exercising the multiplexer without a real store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backing::Backing;
use crate::backing::BackingChange;
use crate::entity::EntityInfo;
use crate::entity::EntityKey;
use crate::errors::BackingError;
use crate::snapshot::Snapshot;

#[derive(Default)]
struct TestBackingInner {
    entities: HashMap<EntityKey, EntityInfo>,
    fetch_err: Option<BackingError>,
    sink: Option<mpsc::Sender<BackingChange>>,
}

/// An in-memory backing store with an injectable fetch error and a change
/// feed driven by `update_entity`/`delete_entity`.
#[derive(Default)]
pub struct TestBacking {
    inner: Mutex<TestBackingInner>,
}

impl TestBacking {
    pub fn new(initial: Vec<EntityInfo>) -> Self {
        let backing = Self::default();
        {
            let mut inner = backing.inner.lock().unwrap();
            for info in initial {
                inner.entities.insert(info.key(), info);
            }
        }
        backing
    }

    /// Makes every subsequent `fetch` fail with `err`.
    pub fn set_fetch_error(
        &self,
        err: BackingError,
    ) {
        self.inner.lock().unwrap().fetch_err = Some(err);
    }

    /// Upserts an entity and notifies the active subscription, if any.
    pub fn update_entity(
        &self,
        info: EntityInfo,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let key = info.key();
        inner.entities.insert(key.clone(), info);
        if let Some(sink) = &inner.sink {
            sink.try_send(BackingChange::present(key)).expect("change sink overflowed");
        }
    }

    /// Drops an entity and notifies the active subscription, if any.
    pub fn delete_entity(
        &self,
        key: &EntityKey,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.entities.remove(key);
        if let Some(sink) = &inner.sink {
            sink.try_send(BackingChange::absent(key.clone())).expect("change sink overflowed");
        }
    }
}

#[async_trait]
impl Backing for TestBacking {
    async fn get_all(
        &self,
        all: &mut Snapshot,
    ) -> Result<(), BackingError> {
        let inner = self.inner.lock().unwrap();
        for info in inner.entities.values() {
            all.update(info.clone());
        }
        Ok(())
    }

    async fn fetch(
        &self,
        key: &EntityKey,
    ) -> Result<EntityInfo, BackingError> {
        let inner = self.inner.lock().unwrap();
        if let Some(err) = &inner.fetch_err {
            return Err(err.clone());
        }
        match inner.entities.get(key) {
            Some(info) => Ok(info.clone()),
            None => Err(BackingError::NotFound(key.clone())),
        }
    }

    fn watch(
        &self,
        sink: mpsc::Sender<BackingChange>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.sink.is_none(), "test backing can only watch once");
        inner.sink = Some(sink);
    }

    fn unwatch(&self) {
        let mut inner = self.inner.lock().unwrap();
        assert!(inner.sink.is_some(), "unwatch without an active watch");
        inner.sink = None;
    }
}
