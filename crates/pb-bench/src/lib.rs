#![forbid(unsafe_code)]

pub mod logging;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pb_backend::{
    BackendError, BackendSpec, CommandExecutor, CommandParams, DEFAULT_BACKEND, LibraryProbe,
    lookup, preflight, render, run_command,
};
use pb_core::{BenchmarkSize, RunRecord, derive_grid};
use serde::{Deserialize, Serialize};

use logging::{StructuredRunLog, write_jsonl};

pub const WORKLOAD_SUFFIX: &str = "_benchmark.py";

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub benchmark_dir: PathBuf,
    pub python: PathBuf,
    pub output_dir: PathBuf,
    pub nproc: usize,
    pub run_timeout: Option<Duration>,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an environment-like lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        let non_empty = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        Self {
            benchmark_dir: non_empty("PB_BENCHMARK_DIR")
                .map_or_else(|| repo_root.join("benchmarks"), PathBuf::from),
            python: non_empty("PB_PYTHON").map_or_else(|| PathBuf::from("python3"), PathBuf::from),
            output_dir: non_empty("PB_OUTPUT_DIR")
                .map_or_else(|| PathBuf::from("."), PathBuf::from),
            nproc: non_empty("PB_NPROC")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|nproc| *nproc > 0)
                .unwrap_or_else(default_nproc),
            run_timeout: non_empty("PB_RUN_TIMEOUT_SECS")
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

fn default_nproc() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchRequest {
    pub sizes: Vec<f64>,
    pub components: Vec<String>,
    pub fortran_library: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

impl BenchRequest {
    #[must_use]
    pub fn new(sizes: Vec<f64>) -> Self {
        Self {
            sizes,
            components: vec![DEFAULT_BACKEND.name().to_string()],
            fortran_library: None,
            log_path: None,
        }
    }
}

/// A discovered workload script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Directory entry name, used as the report key.
    pub name: String,
    /// Canonical path handed to the interpreter.
    pub path: PathBuf,
}

/// Workload files in `dir`, sorted by their entry name. A symlinked workload
/// keeps the link's name even though its path resolves to the target.
pub fn discover_workloads(dir: &Path) -> Result<Vec<Workload>, String> {
    let entries = fs::read_dir(dir).map_err(|error| {
        format!("failed to read benchmark dir {}: {error}", dir.display())
    })?;

    let mut workloads = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| {
            format!("failed to list benchmark dir {}: {error}", dir.display())
        })?;
        let Some(name) = entry
            .file_name()
            .to_str()
            .filter(|name| name.ends_with(WORKLOAD_SUFFIX))
            .map(str::to_string)
        else {
            continue;
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let path = fs::canonicalize(&path)
            .map_err(|error| format!("failed to resolve workload {}: {error}", path.display()))?;
        workloads.push(Workload { name, path });
    }
    workloads.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(workloads)
}

/// Workload file name to its ordered run records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BenchmarkReport {
    workloads: BTreeMap<String, Vec<RunRecord>>,
}

impl BenchmarkReport {
    pub fn begin_workload(&mut self, workload: &str) {
        self.workloads.entry(workload.to_string()).or_default();
    }

    pub fn push(&mut self, workload: &str, record: RunRecord) {
        self.workloads
            .entry(workload.to_string())
            .or_default()
            .push(record);
    }

    #[must_use]
    pub fn records(&self, workload: &str) -> &[RunRecord] {
        self.workloads
            .get(workload)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.workloads.values().map(Vec::len).sum()
    }
}

/// Holds the report until it is written; dropping an unfinished sink writes it.
#[derive(Debug)]
pub struct ReportSink {
    path: PathBuf,
    report: BenchmarkReport,
    written: bool,
}

impl ReportSink {
    /// Opens `benchmark_<unix seconds>.json` under `output_dir`.
    #[must_use]
    pub fn timestamped(output_dir: &Path) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |duration| duration.as_secs_f64());
        Self::at(output_dir.join(format!("benchmark_{secs:.6}.json")))
    }

    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            report: BenchmarkReport::default(),
            written: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn report(&self) -> &BenchmarkReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut BenchmarkReport {
        &mut self.report
    }

    /// Writes the report and returns where it went.
    pub fn finish(mut self) -> Result<(PathBuf, BenchmarkReport), String> {
        self.write()?;
        Ok((
            std::mem::take(&mut self.path),
            std::mem::take(&mut self.report),
        ))
    }

    fn write(&mut self) -> Result<(), String> {
        if self.written {
            return Ok(());
        }
        self.written = true;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| {
                format!("failed to create report dir {}: {error}", parent.display())
            })?;
        }
        let body = serde_json::to_string(&self.report)
            .map_err(|error| format!("failed to serialize benchmark report: {error}"))?;
        fs::write(&self.path, body).map_err(|error| {
            format!("failed to write benchmark report {}: {error}", self.path.display())
        })
    }
}

impl Drop for ReportSink {
    fn drop(&mut self) {
        if let Err(error) = self.write() {
            eprintln!("{error}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub report_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub workloads: usize,
    pub attempted: usize,
    pub failed: usize,
    pub records: usize,
}

impl BenchmarkSummary {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.all_passed())
    }
}

/// Runs every (workload, size, backend) combination and writes the report.
///
/// A failed combination is reported on `console` and omitted from the report;
/// the loop moves on. Configuration problems return `Err` before anything
/// runs, after the (empty) report has been written.
pub fn execute_benchmark_run<E, P, W>(
    config: &HarnessConfig,
    request: &BenchRequest,
    executor: &E,
    probe: &P,
    console: &mut W,
) -> Result<BenchmarkSummary, String>
where
    E: CommandExecutor + ?Sized,
    P: LibraryProbe + ?Sized,
    W: Write + ?Sized,
{
    let mut sink = ReportSink::timestamped(&config.output_dir);

    let plan = match plan_run(config, request, probe) {
        Ok(plan) => plan,
        Err(error) => {
            let (report_path, _) = sink.finish()?;
            return Err(format!(
                "{error}; empty report written to {}",
                report_path.display()
            ));
        }
    };

    let mut logs = Vec::new();
    let mut attempted = 0usize;
    let mut failed = 0usize;

    for workload in &plan.workloads {
        let name = workload.name.as_str();
        sink.report_mut().begin_workload(name);
        writeln!(console, "running benchmark {name} ").map_err(console_error)?;

        for size in &plan.sizes {
            writeln!(console, " current size: {}", size.real_size).map_err(console_error)?;
            let params = CommandParams {
                python: &config.python,
                filename: &workload.path,
                grid: size.grid,
                nproc: config.nproc,
                fortran_lib: request.fortran_library.as_deref(),
            };

            for spec in &plan.backends {
                write!(console, "  {:<15} ... ", spec.id.name()).map_err(console_error)?;
                console.flush().map_err(console_error)?;
                attempted += 1;

                let (replay_command, outcome) = match render(spec, &params) {
                    Ok(command) => (
                        command.replay_command(),
                        run_command(executor, spec, &command),
                    ),
                    Err(error) => (String::new(), Err(error)),
                };

                match outcome {
                    Ok(run) => {
                        if run.truncated {
                            writeln!(console, "{:.2}s (output truncated)", run.elapsed_secs)
                        } else {
                            writeln!(console, "{:.2}s", run.elapsed_secs)
                        }
                        .map_err(console_error)?;
                        sink.report_mut().push(
                            name,
                            RunRecord {
                                component: spec.id.name().to_string(),
                                size: size.real_size,
                                wall_time: run.elapsed_secs,
                                detailed_stats: run.detailed_stats,
                            },
                        );
                        logs.push(StructuredRunLog::passed(
                            name,
                            spec.id.name(),
                            size,
                            replay_command,
                            run.elapsed_secs,
                            run.truncated,
                        ));
                    }
                    Err(error) => {
                        failed += 1;
                        writeln!(console, "failed").map_err(console_error)?;
                        writeln!(console, "{}", failure_output(&error)).map_err(console_error)?;
                        logs.push(StructuredRunLog::failed(
                            name,
                            spec.id.name(),
                            size,
                            replay_command,
                            &error,
                        ));
                    }
                }
            }
        }
    }

    let (report_path, report) = sink.finish()?;
    if let Some(log_path) = request.log_path.as_deref() {
        write_jsonl(log_path, &logs)?;
    }

    Ok(BenchmarkSummary {
        report_path,
        log_path: request.log_path.clone(),
        workloads: report.workload_count(),
        attempted,
        failed,
        records: report.record_count(),
    })
}

struct RunPlan {
    backends: Vec<&'static BackendSpec>,
    sizes: Vec<BenchmarkSize>,
    workloads: Vec<Workload>,
}

fn plan_run<P: LibraryProbe + ?Sized>(
    config: &HarnessConfig,
    request: &BenchRequest,
    probe: &P,
) -> Result<RunPlan, String> {
    if request.sizes.is_empty() {
        return Err("at least one problem size is required".to_string());
    }
    let backends = request
        .components
        .iter()
        .map(|name| lookup(name))
        .collect::<Result<Vec<_>, BackendError>>()
        .map_err(|error| error.to_string())?;
    preflight(&backends, request.fortran_library.as_deref(), probe)
        .map_err(|error| error.to_string())?;

    let sizes = request
        .sizes
        .iter()
        .map(|size| {
            derive_grid(*size).map_err(|error| format!("invalid problem size {size}: {error}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let workloads = discover_workloads(&config.benchmark_dir)?;

    Ok(RunPlan {
        backends,
        sizes,
        workloads,
    })
}

fn failure_output(error: &BackendError) -> String {
    match error {
        BackendError::ProcessFailed { output, .. } => output.clone(),
        other => other.to_string(),
    }
}

fn console_error(error: std::io::Error) -> String {
    format!("failed to write progress output: {error}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Help,
    Run(CliArgs),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub sizes: Vec<f64>,
    pub components: Vec<String>,
    pub fortran_library: Option<PathBuf>,
    pub benchmark_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub python: Option<PathBuf>,
    pub log: Option<PathBuf>,
}

impl CliArgs {
    /// Applies path overrides to `config` and returns the request.
    #[must_use]
    pub fn into_request(self, config: &mut HarnessConfig) -> BenchRequest {
        if let Some(dir) = self.benchmark_dir {
            config.benchmark_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(python) = self.python {
            config.python = python;
        }
        let mut request = BenchRequest::new(self.sizes);
        if !self.components.is_empty() {
            request.components = self.components;
        }
        request.fortran_library = self.fortran_library;
        request.log_path = self.log;
        request
    }
}

pub const USAGE: &str = "usage: run_benchmarks -s SIZE [SIZE ...] [-c COMPONENT ...] \
[-f FORTRAN_LIBRARY] [--benchmark-dir DIR] [--output-dir DIR] [--python PATH] [--log PATH]";

pub fn parse_cli<I>(args: I) -> Result<CliCommand, String>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = CliArgs::default();
    let mut saw_sizes = false;
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "-s" | "--sizes" => {
                saw_sizes = true;
                while let Some(raw) = args.next_if(|next| !is_flag(next)) {
                    let size = raw
                        .parse::<f64>()
                        .map_err(|error| format!("invalid size '{raw}': {error}"))?;
                    cli.sizes.push(size);
                }
            }
            "-c" | "--components" => {
                while let Some(name) = args.next_if(|next| !is_flag(next)) {
                    lookup(&name).map_err(|error| error.to_string())?;
                    cli.components.push(name);
                }
            }
            "-f" | "--fortran-library" => cli.fortran_library = Some(path_value(&mut args, &arg)?),
            "--benchmark-dir" => cli.benchmark_dir = Some(path_value(&mut args, &arg)?),
            "--output-dir" => cli.output_dir = Some(path_value(&mut args, &arg)?),
            "--python" => cli.python = Some(path_value(&mut args, &arg)?),
            "--log" => cli.log = Some(path_value(&mut args, &arg)?),
            other => return Err(format!("unknown arg '{other}'. {USAGE}")),
        }
    }

    if !saw_sizes || cli.sizes.is_empty() {
        return Err(format!("--sizes requires at least one value. {USAGE}"));
    }
    Ok(CliCommand::Run(cli))
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-') && token.parse::<f64>().is_err()
}

fn path_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf, String> {
    args.next()
        .map(PathBuf::from)
        .ok_or_else(|| format!("{flag} requires a path"))
}
