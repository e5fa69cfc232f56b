use db::{Object, Result, Row, Value};
use serde::{Deserialize, Serialize};

use crate::base::{BaseStore, Index, Json, StoreIndexes};

/// Classification of a single test or of the whole submission.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    #[default]
    Rejected,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    CompilationError,
    PartiallyAccepted,
    Failed,
    Queued,
    Running,
}

impl Verdict {
    /// Severity used to break ties when aggregating per-test verdicts.
    pub fn severity(self) -> u8 {
        match self {
            Verdict::CompilationError => 6,
            Verdict::RuntimeError => 5,
            Verdict::TimeLimitExceeded => 4,
            Verdict::MemoryLimitExceeded => 3,
            Verdict::WrongAnswer => 2,
            Verdict::Rejected => 1,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub check_log: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default)]
    pub used_time: i64,
    #[serde(default)]
    pub used_memory: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SolutionReport {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compile_log: String,
    #[serde(default)]
    pub tests: Vec<TestReport>,
}

/// A submitted solution. `content` holds small inline sources;
/// larger ones live in blob storage under `content_id`.
#[derive(Clone, Debug, Default)]
pub struct Solution {
    pub id: i64,
    pub problem_id: i64,
    pub compiler_id: i64,
    pub author_id: i64,
    pub content: String,
    pub content_id: Option<i64>,
    pub report: Json,
    pub create_time: i64,
}

impl Solution {
    /// Parses the stored report; `None` while the solution is not
    /// judged (or a rejudge cleared it).
    pub fn parse_report(&self) -> Result<Option<SolutionReport>> {
        if self.report.is_null() {
            return Ok(None);
        }
        self.report.parse().map(Some)
    }

    pub fn set_report(&mut self, report: Option<&SolutionReport>) -> Result<()> {
        self.report = match report {
            Some(report) => Json::from_value(report)?,
            None => Json::default(),
        };
        Ok(())
    }
}

impl Object for Solution {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            problem_id: row.get_i64("problem_id")?,
            compiler_id: row.get_i64("compiler_id")?,
            author_id: row.get_i64("author_id")?,
            content: row.get_str("content")?,
            content_id: row.get_opt_i64("content_id")?,
            report: Json::from_column(row, "report")?,
            create_time: row.get_opt_i64("create_time")?.unwrap_or_default(),
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("problem_id", Value::Int64(self.problem_id)),
            ("compiler_id", Value::Int64(self.compiler_id)),
            ("author_id", Value::Int64(self.author_id)),
            (
                "content",
                if self.content.is_empty() {
                    Value::Null
                } else {
                    Value::Text(self.content.clone())
                },
            ),
            ("content_id", Value::from(self.content_id)),
            ("report", self.report.to_value()),
            ("create_time", Value::Int64(self.create_time)),
        ]
    }
}

#[derive(Default)]
pub struct SolutionIndexes {
    pub(crate) by_problem: Index<i64>,
}

impl StoreIndexes<Solution> for SolutionIndexes {
    fn clear(&mut self) {
        self.by_problem.clear();
    }

    fn insert(&mut self, object: &Solution) {
        self.by_problem.insert(object.problem_id, object.id);
    }

    fn remove(&mut self, object: &Solution) {
        self.by_problem.remove(&object.problem_id, object.id);
    }
}

pub type SolutionStore = BaseStore<Solution, SolutionIndexes>;

impl SolutionStore {
    pub fn find_by_problem(&self, problem_id: i64) -> Vec<Solution> {
        let state = self.read();
        state
            .indexes
            .by_problem
            .ids(&problem_id)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }
}

pub fn new_solution_store(db: db::Database) -> SolutionStore {
    SolutionStore::new(db, "solve_solution", "solve_solution_event")
}

/// Overall verdict for a finished test list: everything accepted wins,
/// a partial pass reports as such, and otherwise the most frequent
/// failure wins with severity breaking ties.
pub fn aggregate_verdict(tests: &[TestReport]) -> Verdict {
    if tests.is_empty() {
        return Verdict::Rejected;
    }
    let accepted = tests
        .iter()
        .filter(|test| test.verdict == Verdict::Accepted)
        .count();
    if accepted == tests.len() {
        return Verdict::Accepted;
    }
    if accepted > 0 {
        return Verdict::PartiallyAccepted;
    }
    let mut counts: std::collections::HashMap<Verdict, usize> =
        std::collections::HashMap::new();
    for test in tests {
        *counts.entry(test.verdict).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(verdict, count)| (*count, verdict.severity()))
        .map(|(verdict, _)| verdict)
        .unwrap_or(Verdict::Rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_with(verdict: Verdict) -> TestReport {
        TestReport {
            verdict,
            ..Default::default()
        }
    }

    #[test]
    fn test_verdict_names() {
        assert_eq!(
            serde_json::to_string(&Verdict::WrongAnswer).unwrap(),
            "\"wrong_answer\""
        );
        assert_eq!(
            serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap(),
            "\"time_limit_exceeded\""
        );
        let verdict: Verdict = serde_json::from_str("\"partially_accepted\"").unwrap();
        assert_eq!(verdict, Verdict::PartiallyAccepted);
    }

    #[test]
    fn test_aggregate_verdict() {
        assert_eq!(
            aggregate_verdict(&[test_with(Verdict::Accepted)]),
            Verdict::Accepted
        );
        assert_eq!(
            aggregate_verdict(&[
                test_with(Verdict::Accepted),
                test_with(Verdict::WrongAnswer),
            ]),
            Verdict::PartiallyAccepted
        );
        assert_eq!(
            aggregate_verdict(&[
                test_with(Verdict::WrongAnswer),
                test_with(Verdict::WrongAnswer),
                test_with(Verdict::RuntimeError),
            ]),
            Verdict::WrongAnswer
        );
        // Equal counts: severity order breaks the tie.
        assert_eq!(
            aggregate_verdict(&[
                test_with(Verdict::WrongAnswer),
                test_with(Verdict::RuntimeError),
            ]),
            Verdict::RuntimeError
        );
        assert_eq!(aggregate_verdict(&[]), Verdict::Rejected);
    }

    #[test]
    fn test_report_round_trip() {
        let mut solution = Solution::default();
        assert!(solution.parse_report().unwrap().is_none());
        let report = SolutionReport {
            verdict: Verdict::Accepted,
            points: Some(100.0),
            compile_log: "ok".into(),
            tests: vec![test_with(Verdict::Accepted)],
        };
        solution.set_report(Some(&report)).unwrap();
        let parsed = solution.parse_report().unwrap().unwrap();
        assert_eq!(parsed.verdict, Verdict::Accepted);
        assert_eq!(parsed.points, Some(100.0));
        assert_eq!(parsed.tests.len(), 1);
        solution.set_report(None).unwrap();
        assert!(solution.parse_report().unwrap().is_none());
    }
}
