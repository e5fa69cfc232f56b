use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Index, Json, StoreIndexes};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParticipantKind {
    #[default]
    Regular = 1,
    Upsolving = 2,
    Manager = 3,
}

impl ParticipantKind {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for ParticipantKind {
    type Error = db::Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(ParticipantKind::Regular),
            2 => Ok(ParticipantKind::Upsolving),
            3 => Ok(ParticipantKind::Manager),
            value => Err(db::Error::Corrupted(format!(
                "unknown participant kind: {}",
                value
            ))),
        }
    }
}

/// An account participating in a contest.
#[derive(Clone, Debug, Default)]
pub struct ContestParticipant {
    pub id: i64,
    pub contest_id: i64,
    pub account_id: i64,
    pub kind: ParticipantKind,
    pub config: Json,
}

impl Object for ContestParticipant {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            contest_id: row.get_i64("contest_id")?,
            account_id: row.get_i64("account_id")?,
            kind: ParticipantKind::try_from(row.get_i64("kind")?)?,
            config: Json::from_column(row, "config")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("contest_id", Value::Int64(self.contest_id)),
            ("account_id", Value::Int64(self.account_id)),
            ("kind", Value::Int64(self.kind.as_i64())),
            ("config", self.config.to_value()),
        ]
    }
}

#[derive(Default)]
pub struct ContestParticipantIndexes {
    pub(crate) by_contest: Index<i64>,
}

impl StoreIndexes<ContestParticipant> for ContestParticipantIndexes {
    fn clear(&mut self) {
        self.by_contest.clear();
    }

    fn insert(&mut self, object: &ContestParticipant) {
        self.by_contest.insert(object.contest_id, object.id);
    }

    fn remove(&mut self, object: &ContestParticipant) {
        self.by_contest.remove(&object.contest_id, object.id);
    }
}

pub type ContestParticipantStore =
    BaseStore<ContestParticipant, ContestParticipantIndexes>;

impl ContestParticipantStore {
    pub fn find_by_contest(&self, contest_id: i64) -> Vec<ContestParticipant> {
        let state = self.read();
        state
            .indexes
            .by_contest
            .ids(&contest_id)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }
}

pub fn new_contest_participant_store(db: db::Database) -> ContestParticipantStore {
    ContestParticipantStore::new(
        db,
        "solve_contest_participant",
        "solve_contest_participant_event",
    )
}
