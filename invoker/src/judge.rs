//! The `judge_solution` task: compile the submission, run it on every
//! test, classify the outcomes and persist the report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use db::{unix_time, Isolation};
use models::{
    aggregate_verdict, JudgeSolutionTaskConfig, Solution, SolutionReport, TestReport,
    Verdict,
};

use crate::compiler::{
    read_file_capped, CompileOptions, Compiler, CompilerManager, ExecuteOptions,
};
use crate::invoker::{Invoker, TaskContext, TaskImpl};
use crate::polygon;

/// Fallbacks for test sets that do not carry limits.
const DEFAULT_TIME_LIMIT_MS: i64 = 1000;
const DEFAULT_MEMORY_LIMIT: i64 = 256 * 1024 * 1024;

/// Caps on data copied into the report.
const REPORT_DATA_LIMIT: usize = 1024;
const CHECK_DATA_LIMIT: usize = 100;

/// A generator may not write more than this into a test input.
const GENERATOR_OUTPUT_LIMIT: u64 = 64 * 1024 * 1024;

pub(crate) struct JudgeSolutionTask;

impl TaskImpl for JudgeSolutionTask {
    fn execute(&self, invoker: &Invoker, ctx: &TaskContext) -> anyhow::Result<()> {
        let config: JudgeSolutionTaskConfig = ctx
            .task
            .scan_config()
            .context("cannot scan task config")?;
        let core = invoker.core();
        let solution = get_solution(core, config.solution_id)?;
        let problem = match core.problems.get(solution.problem_id) {
            Ok(problem) => problem,
            Err(models::Error::NoRows) => {
                core.problems.sync().context("cannot sync problems")?;
                core.problems
                    .get(solution.problem_id)
                    .context("cannot fetch problem")?
            }
            Err(err) => return Err(err).context("cannot fetch problem"),
        };
        let compiler = invoker
            .compilers()
            .get_compiler(solution.compiler_id)
            .context("cannot fetch compiler")?;
        let temp_dir = tempfile::Builder::new()
            .prefix("solve-task-")
            .tempdir_in(invoker.temp_dir())
            .context("cannot create temp dir")?;
        log::debug!("task {}: temp dir {}", ctx.task.id, temp_dir.path().display());

        let judge = Judge {
            invoker,
            ctx,
            config,
            solution,
            compiler,
            temp_dir: temp_dir.path().to_path_buf(),
        };
        judge.run(problem)
    }
}

fn get_solution(core: &solve_core::Core, id: i64) -> anyhow::Result<Solution> {
    match core.solutions.get(id) {
        Ok(solution) => Ok(solution),
        Err(models::Error::NoRows) => {
            core.solutions.sync().context("cannot sync solutions")?;
            core.solutions.get(id).context("cannot fetch solution")
        }
        Err(err) => Err(err).context("cannot fetch solution"),
    }
}

struct Judge<'a> {
    invoker: &'a Invoker,
    ctx: &'a TaskContext,
    config: JudgeSolutionTaskConfig,
    solution: Solution,
    compiler: Compiler,
    temp_dir: PathBuf,
}

impl Judge<'_> {
    fn run(&self, problem: models::Problem) -> anyhow::Result<()> {
        let problem_dir = self.prepare_problem(&problem)?;
        let solution_path = self.prepare_solution()?;

        let mut report = SolutionReport {
            verdict: Verdict::Rejected,
            ..Default::default()
        };
        let binary_path = self.temp_dir.join("solution.bin");
        let compile_report = self
            .compiler
            .compile(
                &|| self.ctx.cancelled(),
                &CompileOptions::new(&solution_path, &binary_path),
            )
            .context("cannot compile solution")?;
        report.compile_log = compile_report.log.clone();
        if !compile_report.success() {
            report.verdict = Verdict::CompilationError;
            report.tests = Vec::new();
            return self.write_report(&report);
        }

        let config = polygon::read_problem_config(&problem_dir.join("problem.xml"))
            .context("cannot read problem config")?;
        let generators = self.prepare_generators(&config, &problem_dir)?;
        for test_set in &config.test_sets {
            for (index, test) in test_set.tests.iter().enumerate() {
                let result = self.run_test(
                    &problem_dir,
                    &binary_path,
                    &generators,
                    test_set,
                    test,
                    index,
                )?;
                report.tests.push(result);
            }
        }
        report.verdict = aggregate_verdict(&report.tests);
        if self.config.enable_points {
            report.points = Some(
                report
                    .tests
                    .iter()
                    .filter(|test| test.verdict == Verdict::Accepted)
                    .filter_map(|test| test.points)
                    .sum(),
            );
        }
        self.write_report(&report)
    }

    fn prepare_problem(&self, problem: &models::Problem) -> anyhow::Result<PathBuf> {
        let package_id = problem
            .package_id
            .context("problem does not have a package")?;
        let package = self
            .invoker
            .files()
            .download(package_id)
            .context("cannot download problem package")?;
        let problem_dir = self.temp_dir.join("problem");
        crate::archive::extract_zip(&package.path, &problem_dir)
            .context("cannot extract problem package")?;
        Ok(problem_dir)
    }

    fn prepare_solution(&self) -> anyhow::Result<PathBuf> {
        let path = self.temp_dir.join("solution.txt");
        match self.solution.content_id {
            None => {
                std::fs::write(&path, &self.solution.content)
                    .context("cannot write solution")?;
            }
            Some(content_id) => {
                let blob = self
                    .invoker
                    .files()
                    .download(content_id)
                    .context("cannot download solution")?;
                std::fs::copy(&blob.path, &path).context("cannot copy solution")?;
            }
        }
        Ok(path)
    }

    /// Compiles every polygon executable ahead of the test loop.
    /// Generated tests reference them by path without extension.
    fn prepare_generators(
        &self,
        config: &polygon::Problem,
        problem_dir: &Path,
    ) -> anyhow::Result<HashMap<String, (Compiler, PathBuf)>> {
        let mut generators = HashMap::new();
        let needs_generators = config
            .test_sets
            .iter()
            .any(|test_set| test_set.tests.iter().any(|test| !test.cmd.is_empty()));
        if !needs_generators {
            return Ok(generators);
        }
        for executable in &config.executables {
            let source = match &executable.source {
                Some(source) => source,
                None => continue,
            };
            let name = CompilerManager::polygon_compiler_name(&source.kind);
            let compiler = self
                .invoker
                .compilers()
                .get_compiler_by_name(&name)
                .with_context(|| format!("cannot find compiler for {:?}", source.kind))?;
            let key = strip_extension(&source.path);
            let target = self.temp_dir.join(format!(
                "gen-{}",
                key.replace('/', "_")
            ));
            let report = compiler
                .compile(
                    &|| self.ctx.cancelled(),
                    &CompileOptions::new(problem_dir.join(&source.path), &target),
                )
                .with_context(|| format!("cannot compile {:?}", source.path))?;
            if !report.success() {
                anyhow::bail!(
                    "cannot compile {:?}: {}",
                    source.path,
                    report.log
                );
            }
            generators.insert(key, (compiler, target));
        }
        Ok(generators)
    }

    fn run_test(
        &self,
        problem_dir: &Path,
        binary_path: &Path,
        generators: &HashMap<String, (Compiler, PathBuf)>,
        test_set: &polygon::TestSet,
        test: &polygon::Test,
        index: usize,
    ) -> anyhow::Result<TestReport> {
        let input_path =
            problem_dir.join(polygon::format_pattern(&test_set.input_path_pattern, index + 1));
        let answer_path =
            problem_dir.join(polygon::format_pattern(&test_set.answer_path_pattern, index + 1));
        let time_limit = if test_set.time_limit > 0 {
            test_set.time_limit
        } else {
            DEFAULT_TIME_LIMIT_MS
        };
        let memory_limit = if test_set.memory_limit > 0 {
            test_set.memory_limit
        } else {
            DEFAULT_MEMORY_LIMIT
        };
        let points = self.config.enable_points.then(|| test.points).flatten();

        if !test.cmd.is_empty() {
            if let Err(err) = self.generate_input(generators, &test.cmd, &input_path) {
                return Ok(TestReport {
                    verdict: Verdict::Rejected,
                    check_log: format!("cannot generate test: {:#}", err),
                    points,
                    ..Default::default()
                });
            }
        }
        let input = read_file_capped(&input_path, REPORT_DATA_LIMIT).unwrap_or_default();

        let output_path = self.temp_dir.join(format!("output-{}.txt", index));
        let executable = self.compiler.create_executable(binary_path);
        let mut process = executable.create_process(&ExecuteOptions {
            stdin: Some(input_path.clone()),
            stdout: Some(output_path.clone()),
            time_limit: Duration::from_millis(time_limit as u64),
            memory_limit,
            ..Default::default()
        })?;
        process.start()?;
        let run = match process.wait(&|| self.ctx.cancelled()) {
            Ok(run) => run,
            Err(err) => {
                if err.downcast_ref::<safeexec::Error>().map_or(false, |err| {
                    matches!(err, safeexec::Error::Cancelled)
                }) {
                    return Err(err).context("test run was cancelled");
                }
                return Ok(TestReport {
                    verdict: Verdict::Rejected,
                    check_log: format!("cannot run solution: {:#}", err),
                    input,
                    points,
                    ..Default::default()
                });
            }
        };
        process.release();

        let mut result = TestReport {
            verdict: Verdict::Rejected,
            input,
            used_time: run.used_time,
            used_memory: run.used_memory,
            points,
            ..Default::default()
        };
        if !run.success() {
            if run.used_time >= time_limit {
                result.verdict = Verdict::TimeLimitExceeded;
            } else if run.used_memory >= memory_limit {
                result.verdict = Verdict::MemoryLimitExceeded;
            } else {
                result.verdict = Verdict::RuntimeError;
                result.check_log = format!("Exit code: {}", run.exit_code);
            }
            return Ok(result);
        }
        result.output =
            read_file_capped(&output_path, REPORT_DATA_LIMIT).unwrap_or_default();
        match compare_files(&output_path, &answer_path) {
            Ok((message, true)) => {
                result.verdict = Verdict::Accepted;
                result.check_log = message;
            }
            Ok((message, false)) => {
                result.verdict = Verdict::WrongAnswer;
                result.check_log = message;
            }
            Err(err) => {
                result.verdict = Verdict::Rejected;
                result.check_log = format!("cannot compare files: {:#}", err);
            }
        }
        Ok(result)
    }

    fn generate_input(
        &self,
        generators: &HashMap<String, (Compiler, PathBuf)>,
        cmd: &str,
        input_path: &Path,
    ) -> anyhow::Result<()> {
        let mut args: Vec<String> = cmd.split_whitespace().map(String::from).collect();
        if args.is_empty() {
            anyhow::bail!("empty generator command");
        }
        let name = args.remove(0);
        let key = format!("files/{}", name);
        let (compiler, binary) = generators
            .get(&key)
            .with_context(|| format!("cannot find executable {:?}", name))?;
        let report = compiler.execute(
            &|| self.ctx.cancelled(),
            binary,
            &ExecuteOptions {
                args,
                stdout: Some(input_path.to_path_buf()),
                time_limit: Duration::from_secs(30),
                memory_limit: DEFAULT_MEMORY_LIMIT,
                ..Default::default()
            },
        )?;
        if !report.success() {
            anyhow::bail!("generator exited with code {}", report.exit_code);
        }
        let size = std::fs::metadata(input_path).map(|meta| meta.len()).unwrap_or(0);
        if size > GENERATOR_OUTPUT_LIMIT {
            anyhow::bail!("generated input is too large: {} bytes", size);
        }
        Ok(())
    }

    /// Persists the report, but only if this worker still holds the
    /// task lease and nobody has written a report meanwhile.
    fn write_report(&self, report: &SolutionReport) -> anyhow::Result<()> {
        enum Outcome {
            Written,
            LeaseLost,
            AlreadyJudged,
        }
        let core = self.invoker.core();
        let task_id = self.ctx.task.id;
        let solution_id = self.solution.id;
        let outcome = core.db.with_tx(Isolation::RepeatableRead, |tx| {
            core.tasks.sync_tx(tx)?;
            let task = core.tasks.get(task_id)?;
            if task.status != models::TaskStatus::Running || task.expire_time < unix_time()
            {
                return Ok(Outcome::LeaseLost);
            }
            core.solutions.sync_tx(tx)?;
            let mut solution = core.solutions.get(solution_id)?;
            if !solution.report.is_null() {
                return Ok(Outcome::AlreadyJudged);
            }
            solution.set_report(Some(report))?;
            core.solutions.update_tx(tx, &solution, None)?;
            Ok(Outcome::Written)
        })?;
        match outcome {
            Outcome::Written => {
                log::info!(
                    "task {}: solution {} judged: {:?}",
                    task_id,
                    solution_id,
                    report.verdict
                );
                Ok(())
            }
            Outcome::LeaseLost => anyhow::bail!("task lease was lost"),
            Outcome::AlreadyJudged => {
                log::warn!(
                    "task {}: solution {} already has a report",
                    task_id,
                    solution_id
                );
                Ok(())
            }
        }
    }
}

fn strip_extension(path: &str) -> String {
    match path.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => stem.to_owned(),
        _ => path.to_owned(),
    }
}

/// The default comparator: both sides with all whitespace removed must
/// match byte for byte.
pub(crate) fn compare_files(
    output_path: &Path,
    answer_path: &Path,
) -> anyhow::Result<(String, bool)> {
    let output = std::fs::read(output_path).context("cannot read output")?;
    let answer = std::fs::read(answer_path).context("cannot read answer")?;
    if strip_whitespace(&output) == strip_whitespace(&answer) {
        return Ok(("ok".to_owned(), true));
    }
    let message = format!(
        "expected {:?}, got {:?}",
        preview(&answer),
        preview(&output)
    );
    Ok((message, false))
}

fn strip_whitespace(data: &[u8]) -> Vec<u8> {
    data.iter()
        .copied()
        .filter(|b| !matches!(b, b'\n' | b'\r' | b'\t' | b' '))
        .collect()
}

fn preview(data: &[u8]) -> String {
    let data = &data[..data.len().min(CHECK_DATA_LIMIT)];
    String::from_utf8_lossy(data).trim_end_matches('\n').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(output: &str, answer: &str) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("output.txt");
        let answer_path = dir.path().join("answer.txt");
        std::fs::write(&output_path, output).unwrap();
        std::fs::write(&answer_path, answer).unwrap();
        (dir, output_path, answer_path)
    }

    #[test]
    fn test_comparator_accepts_whitespace_noise() {
        for (output, answer) in [
            ("3\n", "3\n"),
            ("3", "3\n"),
            (" 3 \r\n", "3"),
            ("1 2\t3\n", "1\n2\n3"),
        ] {
            let (_dir, output_path, answer_path) = write_pair(output, answer);
            let (message, equal) = compare_files(&output_path, &answer_path).unwrap();
            assert!(equal, "{:?} vs {:?}", output, answer);
            assert_eq!(message, "ok");
        }
    }

    #[test]
    fn test_comparator_rejects_differences() {
        let (_dir, output_path, answer_path) = write_pair("4\n", "3\n");
        let (message, equal) = compare_files(&output_path, &answer_path).unwrap();
        assert!(!equal);
        assert_eq!(message, "expected \"3\", got \"4\"");
    }

    // Reflexive, symmetric and transitive over whitespace scrambles.
    #[test]
    fn test_comparator_equivalence() {
        let variants = ["1 2 3\n", "1\t2\t3", " 1 2 3 ", "1\n2\n3\n"];
        for a in variants {
            for b in variants {
                let (_dir, left, right) = write_pair(a, b);
                let (_, equal) = compare_files(&left, &right).unwrap();
                assert!(equal, "{:?} vs {:?}", a, b);
                let (_, reverse) = compare_files(&right, &left).unwrap();
                assert_eq!(equal, reverse);
            }
        }
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("files/gen.cpp"), "files/gen");
        assert_eq!(strip_extension("files/gen"), "files/gen");
        assert_eq!(strip_extension("files.d/gen"), "files.d/gen");
    }
}
