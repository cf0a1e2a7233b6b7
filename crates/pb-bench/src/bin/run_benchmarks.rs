#![forbid(unsafe_code)]

use pb_backend::{PythonLibraryProbe, SubprocessExecutor};
use pb_bench::{CliCommand, HarnessConfig, USAGE, execute_benchmark_run, parse_cli};
use serde_json::json;

fn main() -> Result<(), String> {
    let cli = match parse_cli(std::env::args().skip(1))? {
        CliCommand::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        CliCommand::Run(cli) => cli,
    };

    let mut config = HarnessConfig::default_paths();
    let request = cli.into_request(&mut config);
    let probe = PythonLibraryProbe {
        python: config.python.clone(),
    };
    let executor = SubprocessExecutor {
        timeout: config.run_timeout,
    };

    let stdout = std::io::stdout();
    let summary = execute_benchmark_run(&config, &request, &executor, &probe, &mut stdout.lock())?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "status": if summary.all_passed() { "ok" } else { "failed" },
            "report_path": summary.report_path.display().to_string(),
            "log_path": summary.log_path.as_ref().map(|path| path.display().to_string()),
            "workloads": summary.workloads,
            "attempted": summary.attempted,
            "failed": summary.failed,
            "records": summary.records,
            "components": request.components,
        }))
        .map_err(|error| format!("failed to serialize summary: {error}"))?
    );

    if !summary.all_passed() {
        std::process::exit(summary.exit_code());
    }
    Ok(())
}
