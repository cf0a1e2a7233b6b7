#![forbid(unsafe_code)]

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use pb_core::{DetailedStats, GridDims, parse_stats};
use serde::{Deserialize, Serialize};

/// Per-stream capture cap; bytes past it are counted and dropped.
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;
const PROBE_OUTPUT_LINE_BYTES: usize = 4096;
const PROBE_DIAGNOSTIC_BYTES: usize = 256;
const FAILURE_DIAGNOSTIC_BYTES: usize = 2048;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    Numpy,
    Bohrium,
    BohriumOpencl,
    Fortran,
    FortranMpi,
}

impl BackendId {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Numpy => "numpy",
            Self::Bohrium => "bohrium",
            Self::BohriumOpencl => "bohrium-opencl",
            Self::Fortran => "fortran",
            Self::FortranMpi => "fortran-mpi",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceRequirement {
    None,
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryCapability {
    Absent,
    Sequential,
    Parallel,
}

impl LibraryCapability {
    #[must_use]
    pub fn satisfies(self, requirement: ReferenceRequirement) -> bool {
        match requirement {
            ReferenceRequirement::None => true,
            ReferenceRequirement::Sequential => self != Self::Absent,
            ReferenceRequirement::Parallel => self == Self::Parallel,
        }
    }
}

/// A benchmark backend: argv template, extra environment, and what it needs.
///
/// Template tokens may embed `{python}`, `{filename}`, `{nx}`, `{ny}`, `{nz}`,
/// `{nproc}` and `{fortran_lib}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSpec {
    pub id: BackendId,
    pub argv: &'static [&'static str],
    pub env: &'static [(&'static str, &'static str)],
    pub profiler: bool,
    pub reference: ReferenceRequirement,
}

pub const DEFAULT_BACKEND: BackendId = BackendId::Numpy;

pub const BACKENDS: [BackendSpec; 5] = [
    BackendSpec {
        id: BackendId::Numpy,
        argv: &[
            "{python}",
            "{filename}",
            "-b",
            "numpy",
            "-s",
            "nx",
            "{nx}",
            "-s",
            "ny",
            "{ny}",
            "-s",
            "nz",
            "{nz}",
        ],
        env: &[],
        profiler: false,
        reference: ReferenceRequirement::None,
    },
    BackendSpec {
        id: BackendId::Bohrium,
        argv: &[
            "{python}",
            "{filename}",
            "-b",
            "bohrium",
            "-s",
            "nx",
            "{nx}",
            "-s",
            "ny",
            "{ny}",
            "-s",
            "nz",
            "{nz}",
        ],
        env: &[("BH_STACK", "openmp"), ("BH_OPENMP_PROF", "1")],
        profiler: true,
        reference: ReferenceRequirement::None,
    },
    BackendSpec {
        id: BackendId::BohriumOpencl,
        argv: &[
            "{python}",
            "{filename}",
            "-b",
            "bohrium",
            "-s",
            "nx",
            "{nx}",
            "-s",
            "ny",
            "{ny}",
            "-s",
            "nz",
            "{nz}",
        ],
        env: &[("BH_STACK", "opencl"), ("BH_OPENCL_PROF", "1")],
        profiler: true,
        reference: ReferenceRequirement::None,
    },
    BackendSpec {
        id: BackendId::Fortran,
        argv: &[
            "{python}",
            "{filename}",
            "--fortran-lib",
            "{fortran_lib}",
            "-s",
            "nx",
            "{nx}",
            "-s",
            "ny",
            "{ny}",
            "-s",
            "nz",
            "{nz}",
        ],
        env: &[],
        profiler: false,
        reference: ReferenceRequirement::Sequential,
    },
    BackendSpec {
        id: BackendId::FortranMpi,
        argv: &[
            "mpiexec",
            "-n",
            "{nproc}",
            "--allow-run-as-root",
            "--",
            "{python}",
            "{filename}",
            "--fortran-lib",
            "{fortran_lib}",
            "-s",
            "nx",
            "{nx}",
            "-s",
            "ny",
            "{ny}",
            "-s",
            "nz",
            "{nz}",
        ],
        env: &[],
        profiler: false,
        reference: ReferenceRequirement::Parallel,
    },
];

pub fn lookup(name: &str) -> Result<&'static BackendSpec, BackendError> {
    BACKENDS
        .iter()
        .find(|spec| spec.id.name() == name)
        .ok_or_else(|| BackendError::UnknownBackend {
            name: name.to_string(),
        })
}

#[must_use]
pub fn backend_names() -> Vec<&'static str> {
    BACKENDS.iter().map(|spec| spec.id.name()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    UnknownBackend {
        name: String,
    },
    UnknownPlaceholder {
        backend: BackendId,
        placeholder: String,
    },
    MissingParameter {
        backend: BackendId,
        parameter: &'static str,
    },
    ReferenceLibraryRequired {
        backend: BackendId,
    },
    ReferenceLibraryUnloadable {
        backend: BackendId,
        path: PathBuf,
    },
    ParallelSupportRequired {
        backend: BackendId,
        path: PathBuf,
    },
    ProbeFailed {
        message: String,
    },
    Spawn {
        program: String,
        message: String,
    },
    Wait {
        message: String,
    },
    ProcessFailed {
        backend: BackendId,
        exit_code: Option<i32>,
        timed_out: bool,
        output: String,
    },
}

impl BackendError {
    /// Configuration errors abort the run before any benchmark executes.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownBackend { .. }
                | Self::ReferenceLibraryRequired { .. }
                | Self::ReferenceLibraryUnloadable { .. }
                | Self::ParallelSupportRequired { .. }
                | Self::ProbeFailed { .. }
        )
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBackend { name } => write!(
                f,
                "unknown backend '{name}' (expected one of: {})",
                backend_names().join(", ")
            ),
            Self::UnknownPlaceholder {
                backend,
                placeholder,
            } => write!(
                f,
                "backend {backend} template uses unknown placeholder {{{placeholder}}}"
            ),
            Self::MissingParameter { backend, parameter } => {
                write!(f, "backend {backend} needs a value for {{{parameter}}}")
            }
            Self::ReferenceLibraryRequired { backend } => write!(
                f,
                "path to the fortran library must be given when running the {backend} backend"
            ),
            Self::ReferenceLibraryUnloadable { backend, path } => write!(
                f,
                "fortran library {} could not be loaded for the {backend} backend",
                path.display()
            ),
            Self::ParallelSupportRequired { backend, path } => write!(
                f,
                "fortran library {} must be compiled with MPI support for the {backend} backend",
                path.display()
            ),
            Self::ProbeFailed { message } => write!(f, "fortran library probe failed: {message}"),
            Self::Spawn { program, message } => write!(f, "failed to spawn {program}: {message}"),
            Self::Wait { message } => write!(f, "benchmark process wait failed: {message}"),
            Self::ProcessFailed {
                backend,
                exit_code,
                timed_out,
                output,
            } => {
                if *timed_out {
                    write!(f, "backend {backend} timed out")?;
                } else {
                    match exit_code {
                        Some(code) => write!(f, "backend {backend} exited with status {code}")?,
                        None => write!(f, "backend {backend} was terminated by a signal")?,
                    }
                }
                let tail = bounded_diagnostic(output.trim(), FAILURE_DIAGNOSTIC_BYTES);
                if !tail.is_empty() {
                    write!(f, ": {tail}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for BackendError {}

#[derive(Debug, Clone, Copy)]
pub struct CommandParams<'a> {
    pub python: &'a Path,
    pub filename: &'a Path,
    pub grid: GridDims,
    pub nproc: usize,
    pub fortran_lib: Option<&'a Path>,
}

impl CommandParams<'_> {
    fn value(&self, placeholder: &str) -> Option<Option<String>> {
        let value = match placeholder {
            "python" => Some(self.python.display().to_string()),
            "filename" => Some(self.filename.display().to_string()),
            "nx" => Some(self.grid.nx.to_string()),
            "ny" => Some(self.grid.ny.to_string()),
            "nz" => Some(self.grid.nz.to_string()),
            "nproc" => Some(self.nproc.to_string()),
            "fortran_lib" => self.fortran_lib.map(|path| path.display().to_string()),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl RenderedCommand {
    /// Shell form of the command, suitable for pasting into a terminal.
    #[must_use]
    pub fn replay_command(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(key, value)| format!("{key}={}", shell_quote(value)))
            .collect();
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// Fills every placeholder of `spec`'s template. No shell is involved.
pub fn render(
    spec: &BackendSpec,
    params: &CommandParams<'_>,
) -> Result<RenderedCommand, BackendError> {
    let mut tokens = spec
        .argv
        .iter()
        .map(|token| render_token(spec.id, token, params))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let program = tokens.next().ok_or(BackendError::MissingParameter {
        backend: spec.id,
        parameter: "program",
    })?;
    Ok(RenderedCommand {
        program,
        args: tokens.collect(),
        env: spec
            .env
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect(),
    })
}

fn render_token(
    backend: BackendId,
    token: &str,
    params: &CommandParams<'_>,
) -> Result<String, BackendError> {
    let mut out = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let name = &after[..close];
        match params.value(name) {
            Some(Some(value)) => out.push_str(&value),
            Some(None) => {
                return Err(BackendError::MissingParameter {
                    backend,
                    parameter: "fortran_lib",
                });
            }
            None => {
                return Err(BackendError::UnknownPlaceholder {
                    backend,
                    placeholder: name.to_string(),
                });
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub sequential: bool,
    pub parallel: bool,
}

impl ProbeOutcome {
    /// Parallel support wins when both module flavours load.
    #[must_use]
    pub fn capability(self) -> LibraryCapability {
        if self.parallel {
            LibraryCapability::Parallel
        } else if self.sequential {
            LibraryCapability::Sequential
        } else {
            LibraryCapability::Absent
        }
    }
}

pub trait LibraryProbe {
    fn probe(&self, library: &Path) -> Result<ProbeOutcome, String>;
}

pub const LIBRARY_PROBE_SCRIPT: &str = r#"
import importlib.machinery
import importlib.util
import json
import sys

path = sys.argv[1]

def loads(name):
    try:
        loader = importlib.machinery.ExtensionFileLoader(name, path)
        spec = importlib.util.spec_from_file_location(name, path, loader=loader)
        module = importlib.util.module_from_spec(spec)
        loader.exec_module(module)
        return True
    except Exception:
        return False

print(json.dumps({"sequential": loads("pyOM_code"), "parallel": loads("pyOM_code_MPI")}))
"#;

/// Loads the library in a throwaway interpreter so a crash cannot take the harness down.
#[derive(Debug, Clone)]
pub struct PythonLibraryProbe {
    pub python: PathBuf,
}

impl LibraryProbe for PythonLibraryProbe {
    fn probe(&self, library: &Path) -> Result<ProbeOutcome, String> {
        let command = RenderedCommand {
            program: self.python.display().to_string(),
            args: vec![
                "-c".to_string(),
                LIBRARY_PROBE_SCRIPT.to_string(),
                library.display().to_string(),
            ],
            env: Vec::new(),
        };
        let capture = capture_process(&command, Some(PROBE_TIMEOUT)).map_err(|e| e.to_string())?;
        if capture.timed_out {
            return Err(format!("probe timed out after {}s", PROBE_TIMEOUT.as_secs()));
        }
        if !capture.status_success {
            let stderr = String::from_utf8_lossy(&capture.stderr);
            return Err(format!(
                "probe interpreter exited with status {}: {}",
                capture.exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                bounded_diagnostic(stderr.trim(), PROBE_DIAGNOSTIC_BYTES)
            ));
        }
        parse_probe_stdout(&String::from_utf8_lossy(&capture.stdout))
    }
}

fn parse_probe_stdout(stdout: &str) -> Result<ProbeOutcome, String> {
    let line = stdout
        .lines()
        .rev()
        .find(|candidate| !candidate.trim().is_empty())
        .ok_or_else(|| "probe produced empty stdout".to_string())?;

    if line.len() > PROBE_OUTPUT_LINE_BYTES {
        return Err(format!(
            "probe output line exceeds max bytes: actual={} max={PROBE_OUTPUT_LINE_BYTES}",
            line.len()
        ));
    }

    serde_json::from_str::<ProbeOutcome>(line).map_err(|error| {
        format!(
            "probe output parse failure: {error}; raw={}",
            bounded_diagnostic(line, PROBE_DIAGNOSTIC_BYTES)
        )
    })
}

/// Checks every selected backend's reference-library needs before any run.
///
/// The library is probed only when some backend needs it.
pub fn preflight<P: LibraryProbe + ?Sized>(
    backends: &[&BackendSpec],
    library: Option<&Path>,
    probe: &P,
) -> Result<LibraryCapability, BackendError> {
    let Some(strictest) = backends
        .iter()
        .filter(|spec| spec.reference != ReferenceRequirement::None)
        .max_by_key(|spec| spec.reference)
    else {
        return Ok(LibraryCapability::Absent);
    };

    let Some(path) = library else {
        return Err(BackendError::ReferenceLibraryRequired {
            backend: strictest.id,
        });
    };
    let capability = probe
        .probe(path)
        .map_err(|message| BackendError::ProbeFailed { message })?
        .capability();

    if capability == LibraryCapability::Absent {
        return Err(BackendError::ReferenceLibraryUnloadable {
            backend: strictest.id,
            path: path.to_path_buf(),
        });
    }
    if !capability.satisfies(strictest.reference) {
        return Err(BackendError::ParallelSupportRequired {
            backend: strictest.id,
            path: path.to_path_buf(),
        });
    }
    Ok(capability)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub elapsed_secs: f64,
    /// Captured stdout followed by captured stderr, which starts on its own line.
    pub output: String,
    pub timed_out: bool,
    /// Either stream exceeded [`MAX_CAPTURE_BYTES`] and was cut.
    pub truncated: bool,
}

pub trait CommandExecutor {
    fn execute(&self, command: &RenderedCommand) -> Result<Execution, BackendError>;
}

/// Runs each command as a fresh child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessExecutor {
    /// On expiry the child's whole process group is killed. Off unix only the
    /// direct child is, so grandchildren can still hold the pipes open.
    pub timeout: Option<Duration>,
}

impl CommandExecutor for SubprocessExecutor {
    fn execute(&self, command: &RenderedCommand) -> Result<Execution, BackendError> {
        let capture = capture_process(command, self.timeout)?;
        let output = merge_output(&capture.stdout, &capture.stderr);
        Ok(Execution {
            success: capture.status_success && !capture.timed_out,
            exit_code: capture.exit_code,
            elapsed_secs: capture.elapsed.as_secs_f64(),
            output,
            timed_out: capture.timed_out,
            truncated: capture.truncated,
        })
    }
}

/// Stdout then stderr, with stderr always starting on a fresh line.
fn merge_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() && !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(&String::from_utf8_lossy(stderr));
    output
}

#[derive(Debug)]
struct ProcessCapture {
    status_success: bool,
    exit_code: Option<i32>,
    elapsed: Duration,
    timed_out: bool,
    truncated: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn capture_process(
    command: &RenderedCommand,
    timeout: Option<Duration>,
) -> Result<ProcessCapture, BackendError> {
    let mut process = command.to_command();
    if timeout.is_some() {
        isolate_process_group(&mut process);
    }
    let started_at = Instant::now();
    let mut child = process
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| BackendError::Spawn {
            program: command.program.clone(),
            message: error.to_string(),
        })?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        terminate_and_reap_child(&mut child);
        return Err(BackendError::Wait {
            message: "child output streams unavailable".to_string(),
        });
    };

    let stdout_reader =
        std::thread::spawn(move || read_stream_capped(stdout, MAX_CAPTURE_BYTES, "stdout"));
    let stderr_reader =
        std::thread::spawn(move || read_stream_capped(stderr, MAX_CAPTURE_BYTES, "stderr"));

    let wait_result = wait_for_exit(&mut child, started_at, timeout);
    let elapsed = started_at.elapsed();
    let stdout_capture = join_reader(stdout_reader, "stdout")?;
    let stderr_capture = join_reader(stderr_reader, "stderr")?;
    let (status, timed_out) = wait_result?;

    Ok(ProcessCapture {
        status_success: status.is_some_and(|status| status.success()),
        exit_code: status.and_then(|status| status.code()),
        elapsed,
        timed_out,
        truncated: stdout_capture.total_bytes > MAX_CAPTURE_BYTES
            || stderr_capture.total_bytes > MAX_CAPTURE_BYTES,
        stdout: stdout_capture.bytes,
        stderr: stderr_capture.bytes,
    })
}

fn join_reader(
    handle: std::thread::JoinHandle<Result<CappedStreamCapture, String>>,
    label: &str,
) -> Result<CappedStreamCapture, BackendError> {
    handle
        .join()
        .map_err(|_| BackendError::Wait {
            message: format!("{label} reader thread panicked"),
        })?
        .map_err(|message| BackendError::Wait { message })
}

/// Returns the exit status, or `None` with `timed_out` set when the deadline passed.
fn wait_for_exit(
    child: &mut Child,
    started_at: Instant,
    timeout: Option<Duration>,
) -> Result<(Option<ExitStatus>, bool), BackendError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((Some(status), false)),
            Ok(None) => {}
            Err(error) => {
                terminate_and_reap_child(child);
                return Err(BackendError::Wait {
                    message: error.to_string(),
                });
            }
        }

        if timeout.is_some_and(|limit| started_at.elapsed() > limit) {
            terminate_process_group(child);
            return Ok((None, true));
        }
        // Sleeping keeps the harness off the CPU the benchmark is using.
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}

fn terminate_and_reap_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Timed runs get their own process group so a timeout also reaches
/// grandchildren (`mpiexec` ranks) that hold the output pipes open.
#[cfg(unix)]
fn isolate_process_group(process: &mut Command) {
    use std::os::unix::process::CommandExt;
    process.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_process: &mut Command) {}

#[cfg(unix)]
fn terminate_process_group(child: &mut Child) {
    let _ = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -9 -{}", child.id()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    terminate_and_reap_child(child);
}

// Best effort: only the direct child is killed.
#[cfg(not(unix))]
fn terminate_process_group(child: &mut Child) {
    terminate_and_reap_child(child);
}

#[derive(Debug)]
struct CappedStreamCapture {
    bytes: Vec<u8>,
    total_bytes: usize,
}

fn read_stream_capped<R: Read>(
    mut reader: R,
    max_bytes: usize,
    stream_label: &str,
) -> Result<CappedStreamCapture, String> {
    let mut bytes = Vec::with_capacity(max_bytes.min(8192));
    let mut total_bytes = 0usize;
    let mut chunk = [0_u8; 8192];

    loop {
        let read_len = reader
            .read(&mut chunk)
            .map_err(|error| format!("benchmark {stream_label} read failed: {error}"))?;
        if read_len == 0 {
            break;
        }

        total_bytes = total_bytes.saturating_add(read_len);
        if bytes.len() < max_bytes {
            let remaining = max_bytes - bytes.len();
            let copy_len = read_len.min(remaining);
            bytes.extend_from_slice(&chunk[..copy_len]);
        }
    }

    Ok(CappedStreamCapture { bytes, total_bytes })
}

/// Truncates `input` to at most `max_len` bytes on a char boundary, marking the cut.
#[must_use]
pub fn bounded_diagnostic(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }

    let mut boundary = max_len.min(input.len());
    while boundary > 0 && !input.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}...", &input[..boundary])
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRun {
    pub elapsed_secs: f64,
    pub output: String,
    pub detailed_stats: Option<DetailedStats>,
    /// Some output was dropped at the capture cap, so stats may be incomplete.
    pub truncated: bool,
}

/// Executes an already rendered command for `spec` and classifies the result.
pub fn run_command<E: CommandExecutor + ?Sized>(
    executor: &E,
    spec: &BackendSpec,
    command: &RenderedCommand,
) -> Result<CompletedRun, BackendError> {
    let execution = executor.execute(command)?;
    if !execution.success {
        return Err(BackendError::ProcessFailed {
            backend: spec.id,
            exit_code: execution.exit_code,
            timed_out: execution.timed_out,
            output: execution.output,
        });
    }

    let detailed_stats = spec.profiler.then(|| parse_stats(&execution.output));
    Ok(CompletedRun {
        elapsed_secs: execution.elapsed_secs,
        output: execution.output,
        detailed_stats,
        truncated: execution.truncated,
    })
}

pub fn run_backend<E: CommandExecutor + ?Sized>(
    executor: &E,
    spec: &BackendSpec,
    params: &CommandParams<'_>,
) -> Result<CompletedRun, BackendError> {
    let command = render(spec, params)?;
    run_command(executor, spec, &command)
}
