use std::sync::Arc;

use db::{unix_time, Database, Error};
use models::{
    new_solution_store, new_task_store, JudgeSolutionTaskConfig, Solution,
    SolutionReport, Task, TaskKind, TaskStatus, Verdict,
};

fn setup() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new_sqlite(dir.path().join("db.sqlite"));
    models::schema::create_tables(&db).unwrap();
    (dir, db)
}

fn queued_task(solution_id: i64) -> Task {
    let mut task = Task {
        kind: TaskKind::JudgeSolution,
        status: TaskStatus::Queued,
        create_time: unix_time(),
        ..Default::default()
    };
    task.set_config(&JudgeSolutionTaskConfig {
        solution_id,
        enable_points: false,
    })
    .unwrap();
    task
}

// Two mirrors of the same table converge through the event log.
#[test]
fn test_mirror_convergence() {
    let (_dir, db) = setup();
    let writer = new_solution_store(db.clone());
    let reader = new_solution_store(db);
    writer.init().unwrap();
    reader.init().unwrap();

    let mut solution = Solution {
        problem_id: 1,
        compiler_id: 2,
        author_id: 3,
        content: "print(42)".into(),
        create_time: unix_time(),
        ..Default::default()
    };
    writer.create(&mut solution).unwrap();
    assert!(solution.id > 0);

    assert!(matches!(reader.get(solution.id), Err(Error::NoRows)));
    reader.sync().unwrap();
    let mirrored = reader.get(solution.id).unwrap();
    assert_eq!(mirrored.content, "print(42)");

    solution
        .set_report(Some(&SolutionReport {
            verdict: Verdict::Accepted,
            ..Default::default()
        }))
        .unwrap();
    writer.update(&solution).unwrap();
    reader.sync().unwrap();
    let mirrored = reader.get(solution.id).unwrap();
    let report = mirrored.parse_report().unwrap().unwrap();
    assert_eq!(report.verdict, Verdict::Accepted);

    writer.delete(solution.id).unwrap();
    reader.sync().unwrap();
    assert!(matches!(reader.get(solution.id), Err(Error::NoRows)));
    assert!(reader.find_by_problem(1).is_empty());
}

// Returned objects are clones: mutating them must not leak into the
// mirror.
#[test]
fn test_get_returns_clones() {
    let (_dir, db) = setup();
    let store = new_solution_store(db);
    store.init().unwrap();
    let mut solution = Solution {
        problem_id: 7,
        content: "a".into(),
        ..Default::default()
    };
    store.create(&mut solution).unwrap();
    store.sync().unwrap();

    let mut copy = store.get(solution.id).unwrap();
    copy.content = "mutated".into();
    assert_eq!(store.get(solution.id).unwrap().content, "a");
}

// One queued task, many workers: exactly one pop succeeds.
#[test]
fn test_pop_queued_mutual_exclusion() {
    let (_dir, db) = setup();
    let store = Arc::new(new_task_store(db));
    store.init().unwrap();
    let mut task = queued_task(1);
    store.create(&mut task).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            store.pop_queued(|kind| kind == TaskKind::JudgeSolution)
        }));
    }
    let mut popped = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(leased) => {
                assert_eq!(leased.id, task.id);
                assert_eq!(leased.status, TaskStatus::Running);
                assert!(leased.expire_time > unix_time() - 1);
                popped += 1;
            }
            Err(Error::NoRows) => {}
            Err(err) => panic!("unexpected error: {}", err),
        }
    }
    assert_eq!(popped, 1);
}

// Pops are FIFO on task id.
#[test]
fn test_pop_queued_fifo() {
    let (_dir, db) = setup();
    let store = new_task_store(db);
    store.init().unwrap();
    let mut ids = Vec::new();
    for solution_id in 1..=3 {
        let mut task = queued_task(solution_id);
        store.create(&mut task).unwrap();
        ids.push(task.id);
    }
    for expected in ids {
        let task = store.pop_queued(|_| true).unwrap();
        assert_eq!(task.id, expected);
    }
    assert!(matches!(store.pop_queued(|_| true), Err(Error::NoRows)));
}

// A running task whose lease expired is eligible again; an active
// lease is not.
#[test]
fn test_pop_queued_lease_recovery() {
    let (_dir, db) = setup();
    let store = new_task_store(db);
    store.init().unwrap();
    let mut task = queued_task(1);
    store.create(&mut task).unwrap();

    let leased = store.pop_queued(|_| true).unwrap();
    assert_eq!(leased.status, TaskStatus::Running);
    assert!(matches!(store.pop_queued(|_| true), Err(Error::NoRows)));

    // Simulate a crashed worker: lease expired in the past.
    let mut expired = leased.clone();
    expired.expire_time = unix_time() - 10;
    store.update(&expired).unwrap();

    let recovered = store.pop_queued(|_| true).unwrap();
    assert_eq!(recovered.id, task.id);
    assert_eq!(recovered.status, TaskStatus::Running);
    assert!(recovered.expire_time > unix_time());
}

#[test]
fn test_heartbeat_extends_and_detects_lost_lease() {
    let (_dir, db) = setup();
    let store = new_task_store(db);
    store.init().unwrap();
    let mut task = queued_task(1);
    store.create(&mut task).unwrap();
    let mut leased = store.pop_queued(|_| true).unwrap();

    let old_expire = leased.expire_time;
    std::thread::sleep(std::time::Duration::from_millis(1100));
    store.heartbeat(&mut leased).unwrap();
    assert!(leased.expire_time >= old_expire);

    // Another actor finishes the task; the heartbeat must fail.
    let mut done = leased.clone();
    done.status = TaskStatus::Succeeded;
    store.update(&done).unwrap();
    assert!(matches!(
        store.heartbeat(&mut leased),
        Err(Error::NoRows)
    ));
}

// The filter narrows pops to supported kinds.
#[test]
fn test_pop_queued_filter() {
    let (_dir, db) = setup();
    let store = new_task_store(db);
    store.init().unwrap();
    let mut task = queued_task(1);
    store.create(&mut task).unwrap();
    assert!(matches!(store.pop_queued(|_| false), Err(Error::NoRows)));
    let popped = store.pop_queued(|kind| kind == TaskKind::JudgeSolution).unwrap();
    assert_eq!(popped.id, task.id);
}
