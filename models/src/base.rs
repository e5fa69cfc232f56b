use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard};

use db::{
    Database, Error, EventConsumer, EventKind, EventStore, Isolation, Object,
    ObjectEvent, ObjectStore, Result, Transaction, Value,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// How far behind the newest event a fresh mirror starts consuming.
/// Events inside this window may still be uncommitted when the mirror
/// snapshots, so they have to be consumed explicitly.
const INIT_GAP_WINDOW: i64 = 25000;

/// Raw JSON column value. Empty means SQL NULL.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Json(Vec<u8>);

impl Json {
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.0)
            .map_err(|err| Error::Corrupted(format!("invalid json column: {}", err)))
    }

    pub fn from_value<T: Serialize>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value)
            .map_err(|err| Error::Corrupted(format!("cannot marshal json: {}", err)))?;
        Ok(Self(data))
    }

    pub fn from_column(row: &db::Row, name: &str) -> Result<Self> {
        let data = row.get_json(name)?;
        if data.is_empty() || data == b"null" {
            return Ok(Self::default());
        }
        serde_json::from_slice::<serde::de::IgnoredAny>(&data)
            .map_err(|_| Error::Corrupted(format!("invalid json in column {}", name)))?;
        Ok(Self(data))
    }

    pub fn to_value(&self) -> Value {
        if self.is_null() {
            Value::Null
        } else {
            Value::Json(self.0.clone())
        }
    }
}

impl From<Vec<u8>> for Json {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

/// Secondary index: key to the set of object ids. `BTreeSet` keeps ids
/// ordered so smallest-id selection is the natural iteration order.
#[derive(Debug)]
pub(crate) struct Index<K: Eq + Hash> {
    map: HashMap<K, BTreeSet<i64>>,
}

impl<K: Eq + Hash> Default for Index<K> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Index<K> {
    pub fn insert(&mut self, key: K, id: i64) {
        self.map.entry(key).or_default().insert(id);
    }

    pub fn remove(&mut self, key: &K, id: i64) {
        if let Some(ids) = self.map.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.map.remove(key);
            }
        }
    }

    pub fn ids(&self, key: &K) -> impl Iterator<Item = i64> + '_ {
        self.map.get(key).into_iter().flatten().copied()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Index hooks of a cached store. The mirror map itself is generic;
/// only the secondary indexes differ between stores.
pub trait StoreIndexes<O: Object>: Default + Send + Sync + 'static {
    fn clear(&mut self);
    fn insert(&mut self, object: &O);
    fn remove(&mut self, object: &O);
}

/// For stores that only need primary-key lookups.
#[derive(Debug, Default)]
pub struct NoIndexes;

impl<O: Object> StoreIndexes<O> for NoIndexes {
    fn clear(&mut self) {}
    fn insert(&mut self, _object: &O) {}
    fn remove(&mut self, _object: &O) {}
}

pub(crate) struct MirrorState<O: Object, X: StoreIndexes<O>> {
    pub(crate) objects: HashMap<i64, O>,
    pub(crate) indexes: X,
    consumer: EventConsumer,
}

/// Event-sourced table with an in-memory mirror.
///
/// Writes go to the object table and its event log inside the caller's
/// transaction; the mirror catches up by consuming events, so it is
/// eventually consistent across every process that mirrors the table.
pub struct BaseStore<O: Object, X: StoreIndexes<O> = NoIndexes> {
    db: Database,
    objects: ObjectStore<O>,
    events: EventStore<O>,
    state: RwLock<MirrorState<O, X>>,
}

impl<O: Object + Default, X: StoreIndexes<O>> BaseStore<O, X> {
    pub fn new(db: Database, table: &str, event_table: &str) -> Self {
        let dialect = db.dialect();
        Self {
            db,
            objects: ObjectStore::new(table, dialect),
            events: EventStore::new(event_table, dialect),
            state: RwLock::new(MirrorState {
                objects: HashMap::new(),
                indexes: X::default(),
                consumer: EventConsumer::new(1),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Rebuilds the mirror: picks a consume checkpoint shortly before
    /// the newest event, marks already-committed events in that window
    /// as seen, then bulk-loads the current object rows.
    pub fn init_tx(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let begin_id = match self.events.last_event_id(tx) {
            Ok(last) => std::cmp::max(1, last - INIT_GAP_WINDOW),
            Err(Error::NoRows) => 1,
            Err(err) => return Err(err),
        };
        let mut state = self.state.write().expect("store lock poisoned");
        state.consumer = EventConsumer::new(begin_id);
        state.consumer.consume_events(&self.events, tx, |_| Ok(()))?;

        state.objects.clear();
        state.indexes.clear();
        let mut rows = self.objects.load_objects(tx)?;
        while let Some(row) = rows.next() {
            let object = O::from_row(&row)?;
            state.indexes.insert(&object);
            state.objects.insert(object.id(), object);
        }
        Ok(())
    }

    /// Applies all newly committed events to the mirror.
    pub fn sync_tx(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let mut state = self.state.write().expect("store lock poisoned");
        let MirrorState {
            objects,
            indexes,
            consumer,
        } = &mut *state;
        consumer.consume_events(&self.events, tx, |event| {
            Self::apply(objects, indexes, event);
            Ok(())
        })
    }

    fn apply(objects: &mut HashMap<i64, O>, indexes: &mut X, event: &ObjectEvent<O>) {
        let id = event.object.id();
        if let Some(old) = objects.remove(&id) {
            indexes.remove(&old);
        }
        match event.kind {
            EventKind::Create | EventKind::Update => {
                indexes.insert(&event.object);
                objects.insert(id, event.object.clone());
            }
            EventKind::Delete => {}
        }
    }

    pub fn init(&self) -> Result<()> {
        self.db
            .with_tx(Isolation::ReadCommitted, |tx| self.init_tx(tx))
    }

    pub fn sync(&self) -> Result<()> {
        self.db
            .with_tx(Isolation::ReadCommitted, |tx| self.sync_tx(tx))
    }

    /// Returns a clone of the cached object.
    pub fn get(&self, id: i64) -> Result<O> {
        let state = self.state.read().expect("store lock poisoned");
        state.objects.get(&id).cloned().ok_or(Error::NoRows)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, MirrorState<O, X>> {
        self.state.read().expect("store lock poisoned")
    }

    /// Takes the table-level write lock used to serialize queue pops.
    pub fn lock_store(&self, tx: &mut Transaction<'_>) -> Result<()> {
        tx.lock_table(self.objects.table())
    }

    /// Inserts the object and its `Create` event atomically.
    pub fn create_tx(
        &self,
        tx: &mut Transaction<'_>,
        object: &mut O,
        account_id: Option<i64>,
    ) -> Result<()> {
        self.objects.create_object(tx, object)?;
        let mut event = ObjectEvent::new(EventKind::Create, object.clone(), account_id);
        self.events.create_event(tx, &mut event)
    }

    /// Updates the object and appends an `Update` event atomically.
    pub fn update_tx(
        &self,
        tx: &mut Transaction<'_>,
        object: &O,
        account_id: Option<i64>,
    ) -> Result<()> {
        self.objects.update_object(tx, object)?;
        let mut event = ObjectEvent::new(EventKind::Update, object.clone(), account_id);
        self.events.create_event(tx, &mut event)
    }

    /// Deletes the row and appends a `Delete` event atomically.
    pub fn delete_tx(
        &self,
        tx: &mut Transaction<'_>,
        id: i64,
        account_id: Option<i64>,
    ) -> Result<()> {
        self.objects.delete_object(tx, id)?;
        let mut object = O::default();
        object.set_id(id);
        let mut event = ObjectEvent::new(EventKind::Delete, object, account_id);
        self.events.create_event(tx, &mut event)
    }

    pub fn create(&self, object: &mut O) -> Result<()> {
        self.db.with_tx(Isolation::ReadCommitted, |tx| {
            self.create_tx(tx, object, None)
        })
    }

    pub fn update(&self, object: &O) -> Result<()> {
        self.db
            .with_tx(Isolation::ReadCommitted, |tx| self.update_tx(tx, object, None))
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        self.db
            .with_tx(Isolation::ReadCommitted, |tx| self.delete_tx(tx, id, None))
    }

    pub(crate) fn find_tx(
        &self,
        tx: &mut Transaction<'_>,
        where_clause: &str,
        params: &[Value],
    ) -> Result<O> {
        self.objects.find_object(tx, where_clause, params)
    }
}
