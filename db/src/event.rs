use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Dialect, Error, Object, Result, Row, Rows, Transaction, Value};

/// Number of unrecovered event-id gaps a consumer keeps before assuming
/// the writing transactions rolled back and abandoning the oldest.
pub const EVENT_GAP_SKIP_WINDOW: usize = 5000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Create = 1,
    Delete = 2,
    Update = 3,
}

impl EventKind {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for EventKind {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(EventKind::Create),
            2 => Ok(EventKind::Delete),
            3 => Ok(EventKind::Update),
            value => Err(Error::Corrupted(format!("unknown event kind: {}", value))),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Create => write!(f, "create"),
            EventKind::Delete => write!(f, "delete"),
            EventKind::Update => write!(f, "update"),
        }
    }
}

/// One record of the append-only event log paired with an object table.
#[derive(Clone, Debug)]
pub struct ObjectEvent<O> {
    pub id: i64,
    pub kind: EventKind,
    pub time: i64,
    pub account_id: Option<i64>,
    pub object: O,
}

impl<O: Object> ObjectEvent<O> {
    pub fn new(kind: EventKind, object: O, account_id: Option<i64>) -> Self {
        Self {
            id: 0,
            kind,
            time: unix_time(),
            account_id,
            object,
        }
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("event_id")?,
            kind: EventKind::try_from(row.get_i64("event_kind")?)?,
            time: row.get_i64("event_time")?,
            account_id: row.get_opt_i64("event_account_id")?,
            object: O::from_row(row)?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        let mut row = vec![
            ("event_id", Value::Int64(self.id)),
            ("event_kind", Value::Int64(self.kind.as_i64())),
            ("event_time", Value::Int64(self.time)),
            ("event_account_id", Value::from(self.account_id)),
        ];
        row.extend(self.object.to_row());
        row
    }
}

pub fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Half-open range `[begin, end)` of event ids; `end = None` is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventRange {
    pub begin: i64,
    pub end: Option<i64>,
}

impl EventRange {
    pub fn since(begin: i64) -> Self {
        Self { begin, end: None }
    }

    fn contains(&self, id: i64) -> bool {
        id >= self.begin && self.end.map_or(true, |end| id < end)
    }

    fn is_empty(&self) -> bool {
        matches!(self.end, Some(end) if self.begin >= end)
    }
}

/// SQL store for the event table paired with an object table.
pub struct EventStore<O: Object> {
    table: String,
    dialect: Dialect,
    _object: PhantomData<O>,
}

impl<O: Object> EventStore<O> {
    pub fn new(table: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            dialect,
            _object: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Appends an event; the database allocates `event_id`.
    pub fn create_event(
        &self,
        tx: &mut Transaction<'_>,
        event: &mut ObjectEvent<O>,
    ) -> Result<()> {
        let row = event.to_row();
        let mut names = String::new();
        let mut placeholders = String::new();
        let mut params = Vec::new();
        for (name, value) in row {
            if name == "event_id" {
                continue;
            }
            if !params.is_empty() {
                names.push_str(", ");
                placeholders.push_str(", ");
            }
            names.push_str(&format!("{:?}", name));
            params.push(value);
            placeholders.push_str(&format!("${}", params.len()));
        }
        let sql = format!(
            "INSERT INTO {:?} ({}) VALUES ({})",
            self.table, names, placeholders
        );
        event.id = match self.dialect {
            Dialect::Postgres => {
                let sql = format!("{} RETURNING \"event_id\"", sql);
                let mut rows = tx.query(&sql, &params)?;
                let row = rows.next().ok_or(Error::NoRows)?;
                row.get_i64("event_id")?
            }
            Dialect::SQLite => {
                tx.execute(&sql, &params)?;
                tx.last_insert_id()?
            }
        };
        Ok(())
    }

    /// Largest allocated `event_id`; `NoRows` if the log is empty.
    pub fn last_event_id(&self, tx: &mut Transaction<'_>) -> Result<i64> {
        let sql = format!(
            "SELECT max(\"event_id\") AS \"event_id\" FROM {:?}",
            self.table
        );
        let mut rows = tx.query(&sql, &[])?;
        match rows.next() {
            Some(row) => row.get_opt_i64("event_id")?.ok_or(Error::NoRows),
            None => Err(Error::NoRows),
        }
    }

    /// Streams events whose ids fall in any of the ranges, in id order.
    pub fn load_events(
        &self,
        tx: &mut Transaction<'_>,
        ranges: &[EventRange],
    ) -> Result<Rows> {
        if ranges.is_empty() {
            return Ok(Rows::empty());
        }
        let mut clauses = String::new();
        let mut params = Vec::new();
        for range in ranges {
            if !clauses.is_empty() {
                clauses.push_str(" OR ");
            }
            params.push(Value::Int64(range.begin));
            match range.end {
                Some(end) => {
                    clauses.push_str(&format!(
                        "(\"event_id\" >= ${} AND \"event_id\" < ${})",
                        params.len(),
                        params.len() + 1
                    ));
                    params.push(Value::Int64(end));
                }
                None => {
                    clauses.push_str(&format!("(\"event_id\" >= ${})", params.len()));
                }
            }
        }
        let sql = format!(
            "SELECT * FROM {:?} WHERE {} ORDER BY \"event_id\"",
            self.table, clauses
        );
        tx.query(&sql, &params)
    }
}

/// Cursor over the event sequence that survives committed-later gaps.
///
/// Event ids are allocated at write time but published at commit time,
/// so a reader that has seen id 12 may later observe id 10 commit. The
/// consumer keeps the set of still-unseen ids as ordered ranges and
/// never skips a gap until it falls out of the skip window.
pub struct EventConsumer {
    ranges: Mutex<Vec<EventRange>>,
}

impl EventConsumer {
    pub fn new(begin_id: i64) -> Self {
        Self {
            ranges: Mutex::new(vec![EventRange::since(begin_id)]),
        }
    }

    /// Smallest event id that may still be unseen; a safe restart
    /// checkpoint.
    pub fn begin_event_id(&self) -> i64 {
        let ranges = self.ranges.lock().expect("consumer mutex poisoned");
        ranges[0].begin
    }

    /// Loads events intersecting the unseen ranges and delivers them to
    /// `f` in id order. An error from `f` aborts without advancing any
    /// range, so the event is redelivered next time.
    pub fn consume_events<O: Object>(
        &self,
        store: &EventStore<O>,
        tx: &mut Transaction<'_>,
        mut f: impl FnMut(&ObjectEvent<O>) -> Result<()>,
    ) -> Result<()> {
        let mut ranges = self.ranges.lock().expect("consumer mutex poisoned");
        let mut rows = store.load_events(tx, &ranges)?;
        let mut it = 0;
        while let Some(row) = rows.next() {
            let event = ObjectEvent::<O>::from_row(&row)?;
            while it < ranges.len() && !ranges[it].contains(event.id) {
                it += 1;
            }
            if it == ranges.len() {
                return Err(Error::Corrupted(format!(
                    "event id {} outside of consumed ranges",
                    event.id
                )));
            }
            f(&event)?;
            if event.id == ranges[it].begin {
                ranges[it].begin += 1;
            } else {
                let tail = EventRange {
                    begin: event.id + 1,
                    end: ranges[it].end,
                };
                ranges[it].end = Some(event.id);
                ranges.insert(it + 1, tail);
            }
        }
        ranges.retain(|range| !range.is_empty());
        if ranges.len() > EVENT_GAP_SKIP_WINDOW {
            let drop = ranges.len() - EVENT_GAP_SKIP_WINDOW;
            ranges.drain(..drop);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, CreateTable, Type};
    use crate::{Database, Isolation};

    #[derive(Clone, Debug, Default)]
    struct Item {
        id: i64,
    }

    impl Object for Item {
        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_i64("id")?,
            })
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::Int64(self.id))]
        }
    }

    fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_sqlite(dir.path().join("db.sqlite"));
        let table = CreateTable {
            name: "item_event".into(),
            columns: vec![
                Column::auto_increment("event_id"),
                Column::new("event_kind", Type::Int64),
                Column::new("event_time", Type::Int64),
                Column::nullable("event_account_id", Type::Int64),
                Column::new("id", Type::Int64),
            ],
            foreign_keys: vec![],
            strict: true,
        };
        db.with_tx(Isolation::ReadCommitted, |tx| {
            let sql = table.build_apply(tx.dialect())?;
            tx.execute(&sql, &[])?;
            Ok(())
        })
        .unwrap();
        (dir, db)
    }

    fn push_event(tx: &mut Transaction<'_>, event_id: i64) {
        tx.execute(
            "INSERT INTO \"item_event\" \
             (\"event_id\", \"event_kind\", \"event_time\", \"event_account_id\", \"id\") \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                Value::Int64(event_id),
                Value::Int64(EventKind::Create.as_i64()),
                Value::Int64(unix_time()),
                Value::Null,
                Value::Int64(event_id),
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_create_event_allocates_ids() {
        let (_dir, db) = setup();
        let store = EventStore::<Item>::new("item_event", db.dialect());
        db.with_tx(Isolation::ReadCommitted, |tx| {
            assert!(matches!(store.last_event_id(tx), Err(Error::NoRows)));
            let mut event = ObjectEvent::new(EventKind::Create, Item { id: 10 }, None);
            store.create_event(tx, &mut event)?;
            assert_eq!(event.id, 1);
            let mut event = ObjectEvent::new(EventKind::Update, Item { id: 10 }, Some(5));
            store.create_event(tx, &mut event)?;
            assert_eq!(event.id, 2);
            assert_eq!(store.last_event_id(tx)?, 2);
            Ok(())
        })
        .unwrap();
    }

    // Events become visible in commit order, not in id order. The
    // consumer must deliver every event exactly once anyway and must
    // not advance the checkpoint past an open gap.
    #[test]
    fn test_consume_events_with_gaps() {
        let (_dir, db) = setup();
        let store = EventStore::<Item>::new("item_event", db.dialect());
        let consumer = EventConsumer::new(1);
        let groups: Vec<Vec<i64>> = vec![
            vec![1, 2, 3],
            vec![5, 6, 8],
            vec![4, 7, 100],
            vec![50, 75, 101],
            vec![51, 74, 102],
            vec![25, 97, 98, 99, 103],
            vec![27, 28, 29, 104],
            vec![26],
        ];
        let mut expected = Vec::new();
        let mut consumed = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut checkpoint = 1;
        for group in groups {
            db.with_tx(Isolation::ReadCommitted, |tx| {
                for &id in &group {
                    push_event(tx, id);
                }
                Ok(())
            })
            .unwrap();
            expected.extend(group.iter().copied());

            // A failing callback must not advance any range.
            let result = db.with_tx(Isolation::ReadCommitted, |tx| {
                consumer.consume_events(&store, tx, |_| {
                    Err(Error::Corrupted("consuming error".into()))
                })
            });
            assert!(matches!(result, Err(Error::Corrupted(_))));

            db.with_tx(Isolation::ReadCommitted, |tx| {
                consumer.consume_events(&store, tx, |event| {
                    consumed.push(event.id);
                    seen.insert(event.id);
                    Ok(())
                })
            })
            .unwrap();
            while seen.contains(&checkpoint) {
                checkpoint += 1;
            }
            assert_eq!(consumer.begin_event_id(), checkpoint);
        }
        // Each group is listed in ascending order, so the delivery
        // order matches the insertion order exactly.
        assert_eq!(consumed, expected);
    }

    // Writer W2 commits id 11 before W1 commits id 10: the consumer
    // sees 11 first, keeps the checkpoint at 10, and still delivers 10
    // exactly once when it finally lands.
    #[test]
    fn test_gap_recovery() {
        let (_dir, db) = setup();
        let store = EventStore::<Item>::new("item_event", db.dialect());
        db.with_tx(Isolation::ReadCommitted, |tx| {
            for id in 1..=9 {
                push_event(tx, id);
            }
            push_event(tx, 11);
            Ok(())
        })
        .unwrap();
        let consumer = EventConsumer::new(1);
        let mut consumed = Vec::new();
        db.with_tx(Isolation::ReadCommitted, |tx| {
            consumer.consume_events(&store, tx, |event| {
                consumed.push(event.id);
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(consumed, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 11]);
        assert_eq!(consumer.begin_event_id(), 10);

        db.with_tx(Isolation::ReadCommitted, |tx| {
            push_event(tx, 10);
            Ok(())
        })
        .unwrap();
        consumed.clear();
        db.with_tx(Isolation::ReadCommitted, |tx| {
            consumer.consume_events(&store, tx, |event| {
                consumed.push(event.id);
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(consumed, vec![10]);
        assert_eq!(consumer.begin_event_id(), 12);

        // Nothing is redelivered afterwards.
        db.with_tx(Isolation::ReadCommitted, |tx| {
            consumer.consume_events(&store, tx, |event| {
                panic!("unexpected event: {}", event.id)
            })
        })
        .unwrap();
    }
}
