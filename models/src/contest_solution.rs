use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Index, StoreIndexes};

/// Cross-reference between a contest and a judged solution.
#[derive(Clone, Debug, Default)]
pub struct ContestSolution {
    pub id: i64,
    pub contest_id: i64,
    pub solution_id: i64,
    pub participant_id: i64,
    pub problem_id: i64,
}

impl Object for ContestSolution {
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
            solution_id: row.get_i64("solution_id")?,
            participant_id: row.get_i64("participant_id")?,
            problem_id: row.get_i64("problem_id")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("contest_id", Value::Int64(self.contest_id)),
            ("solution_id", Value::Int64(self.solution_id)),
            ("participant_id", Value::Int64(self.participant_id)),
            ("problem_id", Value::Int64(self.problem_id)),
        ]
    }
}

#[derive(Default)]
pub struct ContestSolutionIndexes {
    pub(crate) by_contest: Index<i64>,
    pub(crate) by_solution: Index<i64>,
}

impl StoreIndexes<ContestSolution> for ContestSolutionIndexes {
    fn clear(&mut self) {
        self.by_contest.clear();
        self.by_solution.clear();
    }

    fn insert(&mut self, object: &ContestSolution) {
        self.by_contest.insert(object.contest_id, object.id);
        self.by_solution.insert(object.solution_id, object.id);
    }

    fn remove(&mut self, object: &ContestSolution) {
        self.by_contest.remove(&object.contest_id, object.id);
        self.by_solution.remove(&object.solution_id, object.id);
    }
}

pub type ContestSolutionStore = BaseStore<ContestSolution, ContestSolutionIndexes>;

impl ContestSolutionStore {
    pub fn find_by_contest(&self, contest_id: i64) -> Vec<ContestSolution> {
        let state = self.read();
        state
            .indexes
            .by_contest
            .ids(&contest_id)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }

    pub fn find_by_solution(&self, solution_id: i64) -> Option<ContestSolution> {
        let state = self.read();
        let id = state.indexes.by_solution.ids(&solution_id).next()?;
        state.objects.get(&id).cloned()
    }
}

pub fn new_contest_solution_store(db: db::Database) -> ContestSolutionStore {
    ContestSolutionStore::new(
        db,
        "solve_contest_solution",
        "solve_contest_solution_event",
    )
}
