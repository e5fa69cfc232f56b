//! Compiler abstraction: for each language, turn a source file into a
//! binary and run that binary under sandbox limits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::Context;
use models::{CompilerCommandConfig, CompilerConfig, CompilerStore};

use crate::archive::extract_tar_gz;
use crate::files::FileManager;

/// Limits applied to compile jobs (participant limits apply only to
/// test runs).
const COMPILE_TIME_LIMIT: Duration = Duration::from_secs(30);
const COMPILE_MEMORY_LIMIT: i64 = 1024 * 1024 * 1024;

/// Size cap on captured compile logs.
const COMPILE_LOG_LIMIT: usize = 4096;

#[derive(Clone, Debug)]
pub struct MountFile {
    pub source: PathBuf,
    /// Path inside the container, relative to the recipe workdir.
    pub target: String,
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub source: PathBuf,
    pub target: PathBuf,
    pub input_files: Vec<MountFile>,
    pub time_limit: Duration,
    pub memory_limit: i64,
}

impl CompileOptions {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            input_files: Vec::new(),
            time_limit: COMPILE_TIME_LIMIT,
            memory_limit: COMPILE_MEMORY_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompileReport {
    pub exit_code: i32,
    pub used_time: i64,
    pub used_memory: i64,
    pub log: String,
}

impl CompileReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    pub args: Vec<String>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub time_limit: Duration,
    pub memory_limit: i64,
}

#[derive(Clone, Debug, Default)]
pub struct ExecuteReport {
    pub exit_code: i32,
    /// Milliseconds.
    pub used_time: i64,
    /// Bytes.
    pub used_memory: i64,
}

impl ExecuteReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A compiler: a rootfs image plus its compile/execute recipe.
#[derive(Clone)]
pub struct Compiler {
    pub name: String,
    config: CompilerConfig,
    layer: PathBuf,
    safeexec: Arc<safeexec::Manager>,
}

/// Resolves a path from a recipe against the overlay upper dir.
/// Recipe paths are either absolute container paths or relative to the
/// recipe workdir.
fn upper_path(upper: &Path, workdir: &str, path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix('/') {
        upper.join(stripped)
    } else {
        upper.join(workdir.trim_start_matches('/')).join(path)
    }
}

fn copy_into_upper(
    upper: &Path,
    workdir: &str,
    source: &Path,
    target: &str,
) -> anyhow::Result<()> {
    let path = upper_path(upper, workdir, target);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, &path)
        .with_context(|| format!("cannot copy {} into sandbox", source.display()))?;
    Ok(())
}

/// Reads at most `limit` bytes of a file as lossy UTF-8, appending an
/// ellipsis when truncated.
pub fn read_file_capped(path: &Path, limit: usize) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    let mut text = String::from_utf8_lossy(&data[..data.len().min(limit)]).into_owned();
    if data.len() > limit {
        text.push_str("...");
    }
    Ok(text)
}

impl Compiler {
    pub fn compile(
        &self,
        cancelled: &dyn Fn() -> bool,
        options: &CompileOptions,
    ) -> anyhow::Result<CompileReport> {
        let recipe = self
            .config
            .compile
            .as_ref()
            .with_context(|| format!("compiler {} cannot compile", self.name))?;
        let log_path = options.target.with_extension("log");
        let mut process = self
            .safeexec
            .create(safeexec::ProcessConfig {
                layers: vec![self.layer.clone()],
                args: recipe.command.split_whitespace().map(String::from).collect(),
                environ: recipe.environ.clone(),
                workdir: PathBuf::from(&recipe.workdir),
                stdout: Some(log_path.clone()),
                stderr: Some(log_path.clone()),
                time_limit: options.time_limit,
                memory_limit: options.memory_limit,
                ..Default::default()
            })
            .context("cannot create compile sandbox")?;
        let mut run = || -> anyhow::Result<safeexec::Report> {
            if let Some(source) = &recipe.source {
                copy_into_upper(
                    process.upper_dir(),
                    &recipe.workdir,
                    &options.source,
                    source,
                )?;
            }
            for file in &options.input_files {
                copy_into_upper(
                    process.upper_dir(),
                    &recipe.workdir,
                    &file.source,
                    &file.target,
                )?;
            }
            process.start().context("cannot start compiler")?;
            let report = process.wait(cancelled).context("cannot wait compiler")?;
            if report.success() {
                if let Some(binary) = &recipe.binary {
                    let path = upper_path(process.upper_dir(), &recipe.workdir, binary);
                    std::fs::copy(&path, &options.target).with_context(|| {
                        format!("cannot copy binary {} out of sandbox", path.display())
                    })?;
                }
            }
            Ok(report)
        };
        let result = run();
        process.release();
        let report = result?;
        let log = read_file_capped(&log_path, COMPILE_LOG_LIMIT).unwrap_or_default();
        Ok(CompileReport {
            exit_code: report.exit_code,
            used_time: report.time,
            used_memory: report.memory,
            log,
        })
    }

    pub fn create_executable(&self, binary: impl Into<PathBuf>) -> Executable {
        Executable {
            compiler: self.clone(),
            binary: binary.into(),
        }
    }

    /// Compile-and-forget helper: runs the binary once and reports.
    pub fn execute(
        &self,
        cancelled: &dyn Fn() -> bool,
        binary: &Path,
        options: &ExecuteOptions,
    ) -> anyhow::Result<ExecuteReport> {
        let executable = self.create_executable(binary);
        let mut process = executable.create_process(options)?;
        process.start()?;
        let report = process.wait(cancelled);
        process.release();
        report
    }
}

/// A compiled binary bound to the compiler image it runs in.
pub struct Executable {
    compiler: Compiler,
    binary: PathBuf,
}

impl Executable {
    pub fn create_process(
        &self,
        options: &ExecuteOptions,
    ) -> anyhow::Result<ExecutableProcess> {
        let recipe = self
            .compiler
            .config
            .execute
            .as_ref()
            .with_context(|| format!("compiler {} cannot execute", self.compiler.name))?;
        let binary_target = recipe
            .binary
            .clone()
            .unwrap_or_else(|| "solution".to_owned());
        let mut config = safeexec::ProcessConfig {
            layers: vec![self.compiler.layer.clone()],
            environ: recipe.environ.clone(),
            workdir: PathBuf::from(&recipe.workdir),
            time_limit: options.time_limit,
            memory_limit: options.memory_limit,
            ..Default::default()
        };
        let mut args: Vec<String> = if recipe.command.is_empty() {
            vec![container_path(&recipe.workdir, &binary_target)]
        } else {
            recipe.command.split_whitespace().map(String::from).collect()
        };
        args.extend(options.args.iter().cloned());
        config.args = args;

        // Input goes through a file inside the container when the
        // recipe names one, through stdin otherwise.
        let mut stdin_copy = None;
        match (&recipe.input, &options.stdin) {
            (Some(input), Some(path)) => stdin_copy = Some((path.clone(), input.clone())),
            (None, stdin) => config.stdin = stdin.clone(),
            (Some(_), None) => {}
        }
        let mut output_copy = None;
        match (&recipe.output, &options.stdout) {
            (Some(output), Some(path)) => {
                output_copy = Some((output.clone(), path.clone()))
            }
            (None, stdout) => config.stdout = stdout.clone(),
            (Some(_), None) => {}
        }
        config.stderr = options.stderr.clone();

        let process = self
            .compiler
            .safeexec
            .create(config)
            .context("cannot create execute sandbox")?;
        let setup = || -> anyhow::Result<()> {
            copy_into_upper(
                process.upper_dir(),
                &recipe.workdir,
                &self.binary,
                &binary_target,
            )?;
            make_executable(&upper_path(
                process.upper_dir(),
                &recipe.workdir,
                &binary_target,
            ))?;
            if let Some((source, target)) = &stdin_copy {
                copy_into_upper(process.upper_dir(), &recipe.workdir, source, target)?;
            }
            Ok(())
        };
        if let Err(err) = setup() {
            process.release();
            return Err(err);
        }
        Ok(ExecutableProcess {
            recipe: recipe.clone(),
            process: Some(process),
            output_copy,
        })
    }
}

fn container_path(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    }
}

fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

/// One run of an executable inside its own sandbox.
pub struct ExecutableProcess {
    recipe: CompilerCommandConfig,
    process: Option<safeexec::Process>,
    /// Container output file copied to the host path after the run.
    output_copy: Option<(String, PathBuf)>,
}

impl ExecutableProcess {
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.process
            .as_mut()
            .context("process released")?
            .start()
            .context("cannot start solution")?;
        Ok(())
    }

    pub fn wait(&mut self, cancelled: &dyn Fn() -> bool) -> anyhow::Result<ExecuteReport> {
        let process = self.process.as_mut().context("process released")?;
        let report = match process.wait(cancelled) {
            Ok(report) => report,
            Err(safeexec::Error::Cancelled) => {
                return Err(anyhow::Error::new(safeexec::Error::Cancelled))
            }
            Err(err) => return Err(err).context("cannot wait solution"),
        };
        if let Some((output, target)) = &self.output_copy {
            let path = upper_path(process.upper_dir(), &self.recipe.workdir, output);
            // A crashed solution may not have created the file.
            if path.exists() {
                std::fs::copy(&path, target)
                    .context("cannot copy output out of sandbox")?;
            }
        }
        Ok(ExecuteReport {
            exit_code: report.exit_code,
            used_time: report.time,
            used_memory: report.memory,
        })
    }

    pub fn release(&mut self) {
        if let Some(process) = self.process.take() {
            process.release();
        }
    }
}

impl Drop for ExecutableProcess {
    fn drop(&mut self) {
        self.release();
    }
}

enum ImageState {
    Empty,
    InProgress,
    Ready,
}

/// Maps compiler rows to ready-to-use compilers, caching extracted
/// rootfs images on disk. Concurrent workers requesting the same image
/// deduplicate: one extracts, the others wait and share the result.
pub struct CompilerManager {
    compilers: Arc<CompilerStore>,
    files: Arc<FileManager>,
    images_dir: PathBuf,
    safeexec: Arc<safeexec::Manager>,
    images: Mutex<HashMap<i64, Arc<(Mutex<ImageState>, Condvar)>>>,
}

impl CompilerManager {
    pub fn new(
        compilers: Arc<CompilerStore>,
        files: Arc<FileManager>,
        images_dir: PathBuf,
        safeexec: Arc<safeexec::Manager>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&images_dir)?;
        Ok(Self {
            compilers,
            files,
            images_dir,
            safeexec,
            images: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_compiler(&self, id: i64) -> anyhow::Result<Compiler> {
        let compiler = match self.compilers.get(id) {
            Ok(compiler) => compiler,
            Err(models::Error::NoRows) => {
                self.compilers.sync().context("cannot sync compilers")?;
                self.compilers
                    .get(id)
                    .with_context(|| format!("cannot find compiler {}", id))?
            }
            Err(err) => return Err(err).context("cannot read compiler store"),
        };
        self.make_compiler(compiler)
    }

    pub fn get_compiler_by_name(&self, name: &str) -> anyhow::Result<Compiler> {
        let compiler = match self.compilers.get_by_name(name) {
            Some(compiler) => compiler,
            None => {
                self.compilers.sync().context("cannot sync compilers")?;
                self.compilers
                    .get_by_name(name)
                    .with_context(|| format!("cannot find compiler {:?}", name))?
            }
        };
        self.make_compiler(compiler)
    }

    /// Compiler name for a polygon source type like `cpp.g++17`.
    pub fn polygon_compiler_name(kind: &str) -> String {
        match kind {
            "cpp.g++17" => "cpp17-gcc".to_owned(),
            kind => format!("polygon.{}", kind),
        }
    }

    fn make_compiler(&self, compiler: models::Compiler) -> anyhow::Result<Compiler> {
        let config = compiler
            .parse_config()
            .with_context(|| format!("compiler {:?} has invalid config", compiler.name))?;
        let layer = self.image_path(compiler.image_id)?;
        Ok(Compiler {
            name: compiler.name,
            config,
            layer,
            safeexec: self.safeexec.clone(),
        })
    }

    /// Path of the extracted rootfs for an image blob, extracting it
    /// on first use. At most one extraction per image runs at a time.
    fn image_path(&self, image_id: i64) -> anyhow::Result<PathBuf> {
        let target = self.images_dir.join(format!("image-{}", image_id));
        let entry = {
            let mut images = self.images.lock().expect("image map poisoned");
            images
                .entry(image_id)
                .or_insert_with(|| Arc::new((Mutex::new(ImageState::Empty), Condvar::new())))
                .clone()
        };
        let (lock, ready) = &*entry;
        let mut state = lock.lock().expect("image lock poisoned");
        loop {
            match *state {
                ImageState::Ready => return Ok(target),
                ImageState::InProgress => {
                    state = ready.wait(state).expect("image lock poisoned");
                }
                ImageState::Empty => {
                    if target.exists() {
                        *state = ImageState::Ready;
                        continue;
                    }
                    *state = ImageState::InProgress;
                    drop(state);
                    let result = self.fetch_image(image_id, &target);
                    state = lock.lock().expect("image lock poisoned");
                    match result {
                        Ok(()) => {
                            *state = ImageState::Ready;
                            ready.notify_all();
                            return Ok(target);
                        }
                        Err(err) => {
                            *state = ImageState::Empty;
                            ready.notify_all();
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    fn fetch_image(&self, image_id: i64, target: &Path) -> anyhow::Result<()> {
        let image = self
            .files
            .download(image_id)
            .with_context(|| format!("cannot download image {}", image_id))?;
        // Extract aside, then move into place so a crash never leaves
        // a half-extracted image behind.
        let scratch = target.with_extension("tmp");
        let _ = std::fs::remove_dir_all(&scratch);
        extract_tar_gz(&image.path, &scratch)
            .with_context(|| format!("cannot extract image {}", image_id))?;
        std::fs::rename(&scratch, target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_path() {
        let upper = Path::new("/tmp/sandbox/upper");
        assert_eq!(
            upper_path(upper, "/home/solution", "solution.cpp"),
            Path::new("/tmp/sandbox/upper/home/solution/solution.cpp")
        );
        assert_eq!(
            upper_path(upper, "/home/solution", "/usr/share/testlib.h"),
            Path::new("/tmp/sandbox/upper/usr/share/testlib.h")
        );
    }

    #[test]
    fn test_container_path() {
        assert_eq!(container_path("/home/solution", "a.out"), "/home/solution/a.out");
        assert_eq!(container_path("/home/solution/", "a.out"), "/home/solution/a.out");
        assert_eq!(container_path("/home", "/bin/run"), "/bin/run");
    }

    #[test]
    fn test_read_file_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "0123456789").unwrap();
        assert_eq!(read_file_capped(&path, 4).unwrap(), "0123...");
        assert_eq!(read_file_capped(&path, 100).unwrap(), "0123456789");
    }
}
