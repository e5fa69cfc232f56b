use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Index, StoreIndexes};

/// A problem attached to a contest under a short code like "A".
#[derive(Clone, Debug, Default)]
pub struct ContestProblem {
    pub id: i64,
    pub contest_id: i64,
    pub problem_id: i64,
    pub code: String,
}

impl Object for ContestProblem {
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
            problem_id: row.get_i64("problem_id")?,
            code: row.get_str("code")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("contest_id", Value::Int64(self.contest_id)),
            ("problem_id", Value::Int64(self.problem_id)),
            ("code", Value::Text(self.code.clone())),
        ]
    }
}

#[derive(Default)]
pub struct ContestProblemIndexes {
    pub(crate) by_contest: Index<i64>,
}

impl StoreIndexes<ContestProblem> for ContestProblemIndexes {
    fn clear(&mut self) {
        self.by_contest.clear();
    }

    fn insert(&mut self, object: &ContestProblem) {
        self.by_contest.insert(object.contest_id, object.id);
    }

    fn remove(&mut self, object: &ContestProblem) {
        self.by_contest.remove(&object.contest_id, object.id);
    }
}

pub type ContestProblemStore = BaseStore<ContestProblem, ContestProblemIndexes>;

impl ContestProblemStore {
    pub fn find_by_contest(&self, contest_id: i64) -> Vec<ContestProblem> {
        let state = self.read();
        state
            .indexes
            .by_contest
            .ids(&contest_id)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }
}

pub fn new_contest_problem_store(db: db::Database) -> ContestProblemStore {
    ContestProblemStore::new(db, "solve_contest_problem", "solve_contest_problem_event")
}
