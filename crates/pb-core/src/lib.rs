#![forbid(unsafe_code)]

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Ratio between the horizontal extent and the cube-root base unit.
pub const HORIZONTAL_ASPECT: f64 = std::f64::consts::SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl GridDims {
    #[must_use]
    pub const fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    #[must_use]
    pub fn checked_numel(&self) -> Option<usize> {
        self.nx.checked_mul(self.ny)?.checked_mul(self.nz)
    }
}

impl fmt::Display for GridDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.nx, self.ny, self.nz)
    }
}

/// A requested total element count together with the grid actually benchmarked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BenchmarkSize {
    pub requested: f64,
    pub grid: GridDims,
    pub real_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridError {
    NonFinite { requested: f64 },
    NonPositive { requested: f64 },
    Overflow { requested: f64 },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite { requested } => {
                write!(f, "benchmark size must be finite, got {requested}")
            }
            Self::NonPositive { requested } => {
                write!(f, "benchmark size must be positive, got {requested}")
            }
            Self::Overflow { requested } => {
                write!(f, "benchmark size {requested} overflows the grid cell count")
            }
        }
    }
}

impl std::error::Error for GridError {}

/// Maps a requested total element count onto a square-horizontal 3-axis grid.
///
/// `n = floor(cbrt(size)) + 1`, `nx = ny = floor(sqrt(2) * n)`, `nz = n / 2`.
/// The benchmarked size is `nx * ny * nz`, which only approximates the request.
pub fn derive_grid(total_size: f64) -> Result<BenchmarkSize, GridError> {
    if !total_size.is_finite() {
        return Err(GridError::NonFinite {
            requested: total_size,
        });
    }
    if total_size <= 0.0 {
        return Err(GridError::NonPositive {
            requested: total_size,
        });
    }

    let base = total_size.cbrt().floor() + 1.0;
    let horizontal = (HORIZONTAL_ASPECT * base).floor();
    if horizontal >= usize::MAX as f64 {
        return Err(GridError::Overflow {
            requested: total_size,
        });
    }

    let n = base as usize;
    let nx = horizontal as usize;
    let grid = GridDims::new(nx, nx, n / 2);
    let real_size = grid.checked_numel().ok_or(GridError::Overflow {
        requested: total_size,
    })?;

    Ok(BenchmarkSize {
        requested: total_size,
        grid,
        real_size,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    PreFusion,
    Fusion,
    Compile,
    Exec,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::PreFusion, Phase::Fusion, Phase::Compile, Phase::Exec];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PreFusion => "Pre-fusion",
            Self::Fusion => "Fusion",
            Self::Compile => "Compile",
            Self::Exec => "Exec",
        }
    }
}

/// Profiler phase timings in seconds. Unreported phases stay `None`, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedStats {
    #[serde(rename = "Pre-fusion")]
    pub pre_fusion: Option<f64>,
    #[serde(rename = "Fusion")]
    pub fusion: Option<f64>,
    #[serde(rename = "Compile")]
    pub compile: Option<f64>,
    #[serde(rename = "Exec")]
    pub exec: Option<f64>,
}

impl DetailedStats {
    #[must_use]
    pub fn get(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::PreFusion => self.pre_fusion,
            Phase::Fusion => self.fusion,
            Phase::Compile => self.compile,
            Phase::Exec => self.exec,
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<f64> {
        match phase {
            Phase::PreFusion => &mut self.pre_fusion,
            Phase::Fusion => &mut self.fusion,
            Phase::Compile => &mut self.compile,
            Phase::Exec => &mut self.exec,
        }
    }

    /// Records `seconds` unless the phase already holds a value.
    pub fn record_first(&mut self, phase: Phase, seconds: f64) {
        let slot = self.slot_mut(phase);
        if slot.is_none() {
            *slot = Some(seconds);
        }
    }

    #[must_use]
    pub fn reported_phases(&self) -> usize {
        Phase::ALL
            .iter()
            .filter(|phase| self.get(**phase).is_some())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reported_phases() == 0
    }
}

fn phase_patterns() -> &'static [(Phase, Regex)] {
    static PATTERNS: OnceLock<Vec<(Phase, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        Phase::ALL
            .iter()
            .map(|phase| {
                let pattern = format!(r"^\s*{}:\s*(\d+\.?\d*)s", regex::escape(phase.label()));
                let regex = Regex::new(&pattern).expect("phase pattern is a valid regex");
                (*phase, regex)
            })
            .collect()
    })
}

/// Extracts profiler phase timings from free-form process output.
///
/// Each line is matched against `<Phase>: <number>s` (leading whitespace allowed).
/// The first matching line wins per phase; anything else is ignored.
#[must_use]
pub fn parse_stats(output: &str) -> DetailedStats {
    let mut stats = DetailedStats::default();
    for line in output.lines() {
        for (phase, regex) in phase_patterns() {
            if stats.get(*phase).is_some() {
                continue;
            }
            let seconds = regex
                .captures(line)
                .and_then(|captures| captures.get(1))
                .and_then(|value| value.as_str().parse::<f64>().ok());
            if let Some(seconds) = seconds {
                stats.record_first(*phase, seconds);
            }
        }
    }
    stats
}

/// One measured backend execution, serialized in the per-workload report list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub component: String,
    pub size: usize,
    pub wall_time: f64,
    pub detailed_stats: Option<DetailedStats>,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{Value, json};

    use super::{
        DetailedStats, GridDims, GridError, Phase, RunRecord, derive_grid, parse_stats,
    };

    #[test]
    fn unit_size_derives_minimal_grid() {
        let size = derive_grid(1.0).expect("unit size should derive");
        assert_eq!(size.grid, GridDims::new(2, 2, 1));
        assert_eq!(size.real_size, 4);
    }

    #[test]
    fn thousand_elements_derive_fifteen_by_fifteen_by_five() {
        let size = derive_grid(1000.0).expect("size should derive");
        assert_eq!(size.grid, GridDims::new(15, 15, 5));
        assert_eq!(size.real_size, 1125);
        assert_eq!(size.requested, 1000.0);
    }

    #[test]
    fn eight_thousand_elements_use_exact_cube_root() {
        let size = derive_grid(8000.0).expect("size should derive");
        assert_eq!(size.grid, GridDims::new(29, 29, 10));
        assert_eq!(size.real_size, 8410);
    }

    #[test]
    fn sub_unit_sizes_collapse_vertical_axis() {
        let size = derive_grid(0.5).expect("positive size should derive");
        assert_eq!(size.grid, GridDims::new(1, 1, 0));
        assert_eq!(size.real_size, 0);
    }

    #[test]
    fn non_positive_and_non_finite_sizes_are_rejected() {
        assert!(matches!(
            derive_grid(0.0),
            Err(GridError::NonPositive { .. })
        ));
        assert!(matches!(
            derive_grid(-8.0),
            Err(GridError::NonPositive { .. })
        ));
        assert!(matches!(
            derive_grid(f64::NAN),
            Err(GridError::NonFinite { .. })
        ));
        assert!(matches!(
            derive_grid(f64::INFINITY),
            Err(GridError::NonFinite { .. })
        ));
    }

    #[test]
    fn oversized_request_reports_overflow() {
        let err = derive_grid(1e300).expect_err("cell count cannot fit usize");
        assert!(matches!(err, GridError::Overflow { .. }));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn grid_dims_display_is_compact() {
        assert_eq!(GridDims::new(15, 15, 5).to_string(), "15x15x5");
    }

    #[test]
    fn parse_stats_reads_single_phase() {
        let stats = parse_stats("Fusion: 1.23s\n");
        assert_eq!(stats.fusion, Some(1.23));
        assert_eq!(stats.pre_fusion, None);
        assert_eq!(stats.compile, None);
        assert_eq!(stats.exec, None);
        assert_eq!(stats.reported_phases(), 1);
    }

    #[test]
    fn parse_stats_on_empty_text_leaves_every_phase_unset() {
        let stats = parse_stats("");
        assert!(stats.is_empty());
        assert_eq!(stats, DetailedStats::default());
    }

    #[test]
    fn parse_stats_reads_full_profiler_block() {
        let output = "\
[Bohrium profiling]
  Pre-fusion:  0.5s
  Fusion: 2s
  Compile: 3.75s
  Exec: 10.125s
Total execution: 16.4s
";
        let stats = parse_stats(output);
        assert_eq!(stats.pre_fusion, Some(0.5));
        assert_eq!(stats.fusion, Some(2.0));
        assert_eq!(stats.compile, Some(3.75));
        assert_eq!(stats.exec, Some(10.125));
    }

    #[test]
    fn parse_stats_first_match_wins() {
        let stats = parse_stats("Exec: 1.0s\nExec: 9.0s\n");
        assert_eq!(stats.exec, Some(1.0));
    }

    #[test]
    fn parse_stats_is_case_sensitive_and_anchored() {
        let stats = parse_stats("fusion: 1.0s\nTotal Fusion: 2.0s\nEXEC: 3.0s\n");
        assert!(stats.is_empty());
    }

    #[test]
    fn parse_stats_ignores_malformed_numbers() {
        let stats = parse_stats("Compile: abcs\nExec: 4.5\nFusion: .5s\n");
        assert!(stats.is_empty(), "unexpected stats: {stats:?}");
    }

    #[test]
    fn pre_fusion_line_does_not_count_as_fusion() {
        let stats = parse_stats("Pre-fusion: 0.25s\n");
        assert_eq!(stats.pre_fusion, Some(0.25));
        assert_eq!(stats.fusion, None);
    }

    #[test]
    fn detailed_stats_serialize_unset_phases_as_null() {
        let stats = parse_stats("Compile: 1.5s");
        let value = serde_json::to_value(stats).expect("stats should serialize");
        assert_eq!(
            value,
            json!({"Pre-fusion": null, "Fusion": null, "Compile": 1.5, "Exec": null})
        );
    }

    #[test]
    fn run_record_matches_report_schema() {
        let record = RunRecord {
            component: "numpy".to_string(),
            size: 1125,
            wall_time: 0.75,
            detailed_stats: None,
        };
        let value = serde_json::to_value(&record).expect("record should serialize");
        let object = value.as_object().expect("record should be an object");
        assert_eq!(object.len(), 4);
        assert_eq!(object.get("component"), Some(&json!("numpy")));
        assert_eq!(object.get("size"), Some(&json!(1125)));
        assert_eq!(object.get("wall_time"), Some(&json!(0.75)));
        assert_eq!(object.get("detailed_stats"), Some(&Value::Null));
    }

    #[test]
    fn phase_labels_are_stable() {
        let labels: Vec<&str> = Phase::ALL.iter().map(|phase| phase.label()).collect();
        assert_eq!(labels, ["Pre-fusion", "Fusion", "Compile", "Exec"]);
    }

    proptest! {
        #[test]
        fn prop_derived_grid_is_square_and_consistent(total in 1e-6f64..1e12f64) {
            let size = derive_grid(total).expect("positive finite sizes derive");
            prop_assert_eq!(size.grid.nx, size.grid.ny);
            prop_assert_eq!(size.real_size, size.grid.nx * size.grid.ny * size.grid.nz);

            let n = total.cbrt().floor() as usize + 1;
            prop_assert_eq!(size.grid.nz, n / 2);
            prop_assert!(size.grid.nx >= n);
        }

        #[test]
        fn prop_parse_stats_never_panics(text in ".{0,256}") {
            let stats = parse_stats(&text);
            prop_assert!(stats.reported_phases() <= Phase::ALL.len());
        }

        #[test]
        fn prop_parse_stats_reads_formatted_phase(
            millis in 0u32..1_000_000,
            indent in 0usize..4,
        ) {
            let seconds = f64::from(millis) / 1000.0;
            let line = format!("{}Exec: {seconds:.3}s", " ".repeat(indent));
            let stats = parse_stats(&line);
            let parsed = stats.exec.expect("formatted phase line should parse");
            prop_assert!((parsed - seconds).abs() < 1e-9);
            prop_assert_eq!(stats.reported_phases(), 1);
        }
    }
}
