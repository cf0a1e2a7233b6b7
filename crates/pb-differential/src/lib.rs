#![forbid(unsafe_code)]

//! Differential checks between a "new" and a "legacy" implementation of the
//! same model routines.
//!
//! Both implementations are seeded with identical pseudo-random state, every
//! declared routine is invoked on both in declaration order, and after each
//! routine the declared field list is compared under a tolerance. Mismatches
//! are collected, never raised.

pub mod numerics;

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::fmt;

use pb_compare::{FieldComparison, FieldValue, Tolerance, compare_present};
use pb_core::GridDims;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RoutineArg {
    /// The implementation's own state handle.
    State,
    Int(i64),
    Float(f64),
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoutineCall<'a> {
    Positional(&'a [RoutineArg]),
    Keyword(&'a BTreeMap<String, RoutineArg>),
}

/// An implementation under test, seen only through named numeric fields.
pub trait Implementation {
    fn label(&self) -> &str;

    /// Applies the suite's grid and settings before any state is seeded.
    fn configure(
        &mut self,
        grid: GridDims,
        settings: &BTreeMap<String, SettingValue>,
    ) -> Result<(), String>;

    fn set_attribute(&mut self, name: &str, value: FieldValue) -> Result<(), String>;

    fn attribute(&self, name: &str) -> Option<FieldValue>;

    fn invoke(&mut self, routine: &str, call: RoutineCall<'_>) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRoutineSpec {
    pub name: String,
    pub new_args: Vec<RoutineArg>,
    pub legacy_kwargs: BTreeMap<String, RoutineArg>,
}

impl TestRoutineSpec {
    #[must_use]
    pub fn state_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            new_args: vec![RoutineArg::State],
            legacy_kwargs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Distribution {
    Uniform { low: f64, high: f64 },
    StandardNormal,
    /// Integers in `low..high`.
    Integer { low: i64, high: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedSpec {
    pub name: String,
    /// Empty for scalar attributes.
    pub shape: Vec<usize>,
    pub distribution: Distribution,
}

/// Largest integer magnitude a seeded `f64` attribute holds exactly.
pub const MAX_EXACT_INT: i64 = 1 << 53;

impl SeedSpec {
    #[must_use]
    pub fn scalar(name: impl Into<String>, distribution: Distribution) -> Self {
        Self::array(name, Vec::new(), distribution)
    }

    #[must_use]
    pub fn array(name: impl Into<String>, shape: Vec<usize>, distribution: Distribution) -> Self {
        Self {
            name: name.into(),
            shape,
            distribution,
        }
    }

    fn validate(&self) -> Result<usize, DriverError> {
        let invalid = |reason: String| DriverError::InvalidSeedSpec {
            attribute: self.name.clone(),
            reason,
        };
        match self.distribution {
            Distribution::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && low <= high) {
                    return Err(invalid(format!("uniform bounds [{low}, {high}) are unusable")));
                }
            }
            Distribution::StandardNormal => {}
            Distribution::Integer { low, high } => {
                if low >= high {
                    return Err(invalid(format!("integer range {low}..{high} is empty")));
                }
                if low < -MAX_EXACT_INT || high > MAX_EXACT_INT {
                    return Err(invalid(format!(
                        "integer range {low}..{high} exceeds +/-2^53 and would round"
                    )));
                }
            }
        }
        self.shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| invalid(format!("shape {:?} overflows", self.shape)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Flag(bool),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferentialSuite {
    pub name: String,
    pub grid: GridDims,
    /// Settings both implementations must be constructed with.
    pub settings: BTreeMap<String, SettingValue>,
    pub seed: u64,
    pub seed_plan: Vec<SeedSpec>,
    pub routines: Vec<TestRoutineSpec>,
    pub compared_fields: Vec<String>,
    pub tolerance: Tolerance,
}

impl DifferentialSuite {
    /// Draws every seeded attribute from a ChaCha stream keyed by `self.seed`.
    pub fn generate_state(&self) -> Result<Vec<(String, FieldValue)>, DriverError> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut out = Vec::with_capacity(self.seed_plan.len());
        for spec in &self.seed_plan {
            let numel = spec.validate()?;
            let data = (0..numel)
                .map(|_| sample(&mut rng, spec.distribution))
                .collect::<Vec<_>>();
            let value = if spec.shape.is_empty() {
                FieldValue::Scalar(data[0])
            } else {
                FieldValue::array(spec.shape.clone(), data).map_err(|error| {
                    DriverError::InvalidSeedSpec {
                        attribute: spec.name.clone(),
                        reason: error.to_string(),
                    }
                })?
            };
            out.push((spec.name.clone(), value));
        }
        Ok(out)
    }
}

fn sample(rng: &mut ChaCha8Rng, distribution: Distribution) -> f64 {
    match distribution {
        Distribution::Uniform { low, high } => low + (high - low) * rng.random::<f64>(),
        Distribution::StandardNormal => {
            // Box-Muller; u1 is kept away from zero for the log.
            let u1 = 1.0 - rng.random::<f64>();
            let u2 = rng.random::<f64>();
            (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
        }
        Distribution::Integer { low, high } => rng.random_range(low..high) as f64,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Uninitialized,
    Seeded,
    Executed,
    Compared,
    Done,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Seeded => "seeded",
            Self::Executed => "executed",
            Self::Compared => "compared",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    InvalidTransition {
        state: DriverState,
        action: &'static str,
    },
    InvalidSeedSpec {
        attribute: String,
        reason: String,
    },
    ConfigureRejected {
        implementation: String,
        message: String,
    },
    SeedRejected {
        implementation: String,
        attribute: String,
        message: String,
    },
    RoutineFailed {
        implementation: String,
        routine: String,
        message: String,
    },
    RoutinesPending {
        remaining: usize,
    },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { state, action } => {
                write!(f, "cannot {action} while driver is {state}")
            }
            Self::InvalidSeedSpec { attribute, reason } => {
                write!(f, "invalid seed spec for '{attribute}': {reason}")
            }
            Self::ConfigureRejected {
                implementation,
                message,
            } => write!(f, "{implementation} rejected suite configuration: {message}"),
            Self::SeedRejected {
                implementation,
                attribute,
                message,
            } => write!(
                f,
                "{implementation} rejected seeded attribute '{attribute}': {message}"
            ),
            Self::RoutineFailed {
                implementation,
                routine,
                message,
            } => write!(f, "{implementation} routine '{routine}' failed: {message}"),
            Self::RoutinesPending { remaining } => {
                write!(f, "cannot finish with {remaining} routine(s) still pending")
            }
        }
    }
}

impl std::error::Error for DriverError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutineReport {
    pub routine: String,
    pub passed: bool,
    pub checks: Vec<FieldComparison>,
}

impl RoutineReport {
    pub fn failed_fields(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .filter(|check| !check.passed())
            .map(|check| check.field.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub seed: u64,
    pub new_implementation: String,
    pub legacy_implementation: String,
    pub passed: bool,
    pub total_checks: usize,
    pub failed_checks: usize,
    pub routines: Vec<RoutineReport>,
}

/// Drives one new and one legacy implementation through a [`DifferentialSuite`].
///
/// `Uninitialized -> Seeded -> (Executed -> Compared)* -> Done`, one
/// `Executed -> Compared` cycle per declared routine.
pub struct DualDriver<N, L> {
    suite: DifferentialSuite,
    new_impl: N,
    legacy_impl: L,
    state: DriverState,
    next_routine: usize,
    reports: Vec<RoutineReport>,
}

impl<N: Implementation, L: Implementation> DualDriver<N, L> {
    #[must_use]
    pub fn new(suite: DifferentialSuite, new_impl: N, legacy_impl: L) -> Self {
        Self {
            suite,
            new_impl,
            legacy_impl,
            state: DriverState::Uninitialized,
            next_routine: 0,
            reports: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    #[must_use]
    pub fn suite(&self) -> &DifferentialSuite {
        &self.suite
    }

    #[must_use]
    pub fn pending_routines(&self) -> usize {
        self.suite.routines.len() - self.next_routine
    }

    #[must_use]
    pub fn new_implementation(&self) -> &N {
        &self.new_impl
    }

    #[must_use]
    pub fn legacy_implementation(&self) -> &L {
        &self.legacy_impl
    }

    #[must_use]
    pub fn into_implementations(self) -> (N, L) {
        (self.new_impl, self.legacy_impl)
    }

    pub fn seed(&mut self) -> Result<(), DriverError> {
        self.expect_state(&[DriverState::Uninitialized], "seed")?;
        let state = self.suite.generate_state()?;
        configure(&mut self.new_impl, &self.suite)?;
        configure(&mut self.legacy_impl, &self.suite)?;
        for (name, value) in state {
            seed_attribute(&mut self.new_impl, &name, value.clone())?;
            seed_attribute(&mut self.legacy_impl, &name, value)?;
        }
        self.state = DriverState::Seeded;
        Ok(())
    }

    /// Invokes the next declared routine on both implementations.
    pub fn execute_next(&mut self) -> Result<&str, DriverError> {
        self.expect_state(&[DriverState::Seeded, DriverState::Compared], "execute")?;
        let index = self.next_routine;
        let Some(routine) = self.suite.routines.get(index) else {
            return Err(DriverError::InvalidTransition {
                state: self.state,
                action: "execute past the last routine",
            });
        };

        invoke_routine(
            &mut self.new_impl,
            &routine.name,
            RoutineCall::Positional(&routine.new_args),
        )?;
        invoke_routine(
            &mut self.legacy_impl,
            &routine.name,
            RoutineCall::Keyword(&routine.legacy_kwargs),
        )?;

        self.next_routine += 1;
        self.state = DriverState::Executed;
        Ok(&self.suite.routines[index].name)
    }

    /// Compares every declared field after the routine just executed.
    pub fn compare_current(&mut self) -> Result<&RoutineReport, DriverError> {
        self.expect_state(&[DriverState::Executed], "compare")?;
        let routine = &self.suite.routines[self.next_routine - 1];

        let mut passed = true;
        let mut checks = Vec::with_capacity(self.suite.compared_fields.len());
        for field in &self.suite.compared_fields {
            let new_value = self.new_impl.attribute(field);
            let legacy_value = self.legacy_impl.attribute(field);
            let check = compare_present(
                field,
                new_value.as_ref(),
                legacy_value.as_ref(),
                self.suite.tolerance,
            );
            passed &= check.passed();
            checks.push(check);
        }

        self.reports.push(RoutineReport {
            routine: routine.name.clone(),
            passed,
            checks,
        });
        self.state = DriverState::Compared;
        Ok(&self.reports[self.reports.len() - 1])
    }

    pub fn finish(&mut self) -> Result<SuiteReport, DriverError> {
        self.expect_state(&[DriverState::Seeded, DriverState::Compared], "finish")?;
        let remaining = self.pending_routines();
        if remaining > 0 {
            return Err(DriverError::RoutinesPending { remaining });
        }

        let reports = std::mem::take(&mut self.reports);
        let total_checks = reports.iter().map(|report| report.checks.len()).sum();
        let failed_checks = reports
            .iter()
            .map(|report| report.failed_fields().count())
            .sum();
        let passed = reports.iter().fold(true, |acc, report| acc & report.passed);

        self.state = DriverState::Done;
        Ok(SuiteReport {
            suite: self.suite.name.clone(),
            seed: self.suite.seed,
            new_implementation: self.new_impl.label().to_string(),
            legacy_implementation: self.legacy_impl.label().to_string(),
            passed,
            total_checks,
            failed_checks,
            routines: reports,
        })
    }

    /// Runs every remaining transition to `Done`.
    pub fn run(&mut self) -> Result<SuiteReport, DriverError> {
        if self.state == DriverState::Uninitialized {
            self.seed()?;
        }
        if self.state == DriverState::Executed {
            self.compare_current()?;
        }
        while self.pending_routines() > 0 {
            self.execute_next()?;
            self.compare_current()?;
        }
        self.finish()
    }

    fn expect_state(
        &self,
        allowed: &[DriverState],
        action: &'static str,
    ) -> Result<(), DriverError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }
}

fn configure<I: Implementation>(
    implementation: &mut I,
    suite: &DifferentialSuite,
) -> Result<(), DriverError> {
    implementation
        .configure(suite.grid, &suite.settings)
        .map_err(|message| DriverError::ConfigureRejected {
            implementation: implementation.label().to_string(),
            message,
        })
}

fn seed_attribute<I: Implementation>(
    implementation: &mut I,
    name: &str,
    value: FieldValue,
) -> Result<(), DriverError> {
    implementation
        .set_attribute(name, value)
        .map_err(|message| DriverError::SeedRejected {
            implementation: implementation.label().to_string(),
            attribute: name.to_string(),
            message,
        })
}

fn invoke_routine<I: Implementation>(
    implementation: &mut I,
    routine: &str,
    call: RoutineCall<'_>,
) -> Result<(), DriverError> {
    implementation
        .invoke(routine, call)
        .map_err(|message| DriverError::RoutineFailed {
            implementation: implementation.label().to_string(),
            routine: routine.to_string(),
            message,
        })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pb_compare::{FieldValue, Tolerance, Verdict};
    use pb_core::GridDims;
    use proptest::prelude::*;

    use super::{
        DifferentialSuite, Distribution, DriverError, DriverState, DualDriver, Implementation,
        MAX_EXACT_INT, RoutineArg, RoutineCall, SeedSpec, SettingValue, TestRoutineSpec,
    };

    #[derive(Debug, Default)]
    struct MapModel {
        label: &'static str,
        configured: Option<(GridDims, BTreeMap<String, SettingValue>)>,
        reject_settings: bool,
        fields: BTreeMap<String, FieldValue>,
        calls: Vec<String>,
        perturb: Option<(&'static str, f64)>,
        fail_on: Option<&'static str>,
    }

    impl MapModel {
        fn named(label: &'static str) -> Self {
            Self {
                label,
                ..Self::default()
            }
        }

        fn array(&self, name: &str) -> Result<Vec<f64>, String> {
            self.fields
                .get(name)
                .map(|value| value.values().to_vec())
                .ok_or_else(|| format!("missing field {name}"))
        }
    }

    impl Implementation for MapModel {
        fn label(&self) -> &str {
            self.label
        }

        fn configure(
            &mut self,
            grid: GridDims,
            settings: &BTreeMap<String, SettingValue>,
        ) -> Result<(), String> {
            if self.reject_settings {
                return Err("unsupported settings".to_string());
            }
            self.configured = Some((grid, settings.clone()));
            Ok(())
        }

        fn set_attribute(&mut self, name: &str, value: FieldValue) -> Result<(), String> {
            if self.configured.is_none() {
                return Err("seeded before configure".to_string());
            }
            self.fields.insert(name.to_string(), value);
            Ok(())
        }

        fn attribute(&self, name: &str) -> Option<FieldValue> {
            self.fields.get(name).cloned()
        }

        fn invoke(&mut self, routine: &str, call: RoutineCall<'_>) -> Result<(), String> {
            let convention = match call {
                RoutineCall::Positional(args) => {
                    if args.first() != Some(&RoutineArg::State) {
                        return Err("positional call must lead with the state".to_string());
                    }
                    "positional"
                }
                RoutineCall::Keyword(_) => "keyword",
            };
            self.calls.push(format!("{routine}:{convention}"));
            if self.fail_on == Some(routine) {
                return Err("boom".to_string());
            }

            match routine {
                "scale_grid" => {
                    let scaled: Vec<f64> = self.array("dxt")?.iter().map(|v| v * 2.0).collect();
                    let shape = vec![scaled.len()];
                    self.fields.insert(
                        "dxt".to_string(),
                        FieldValue::array(shape, scaled).map_err(|e| e.to_string())?,
                    );
                }
                "accumulate" => {
                    let total: f64 = self.array("dxt")?.iter().sum();
                    self.fields
                        .insert("total".to_string(), FieldValue::Scalar(total));
                }
                _ => {}
            }

            if let Some((field, delta)) = self.perturb {
                if let Some(FieldValue::Scalar(value)) = self.fields.get_mut(field) {
                    *value += delta;
                }
            }
            Ok(())
        }
    }

    fn toy_suite(seed: u64) -> DifferentialSuite {
        DifferentialSuite {
            name: "toy".to_string(),
            grid: GridDims::new(4, 4, 2),
            settings: BTreeMap::from([
                ("enable_cyclic_x".to_string(), SettingValue::Flag(true)),
                ("halo".to_string(), SettingValue::Int(2)),
            ]),
            seed,
            seed_plan: vec![
                SeedSpec::scalar("origin", Distribution::Uniform { low: 0.0, high: 1.0 }),
                SeedSpec::array("dxt", vec![8], Distribution::Uniform { low: 1.0, high: 101.0 }),
                SeedSpec::array("kbot", vec![4, 4], Distribution::Integer { low: 0, high: 2 }),
                SeedSpec::array("coriolis", vec![4, 4], Distribution::StandardNormal),
            ],
            routines: vec![
                TestRoutineSpec::state_only("scale_grid"),
                TestRoutineSpec::state_only("accumulate"),
            ],
            compared_fields: vec!["dxt".to_string(), "total".to_string(), "kbot".to_string()],
            tolerance: Tolerance::DEFAULT,
        }
    }

    #[test]
    fn both_implementations_receive_identical_seeded_state() {
        let mut driver = DualDriver::new(
            toy_suite(7),
            MapModel::named("new"),
            MapModel::named("legacy"),
        );
        driver.seed().expect("seeding should succeed");
        assert_eq!(driver.state(), DriverState::Seeded);
        assert_eq!(
            driver.new_implementation().fields,
            driver.legacy_implementation().fields
        );
        assert_eq!(driver.new_implementation().fields.len(), 4);
    }

    #[test]
    fn both_implementations_are_configured_with_suite_grid_and_settings() {
        let suite = toy_suite(7);
        let expected = Some((suite.grid, suite.settings.clone()));
        let mut driver = DualDriver::new(suite, MapModel::named("new"), MapModel::named("legacy"));
        driver.seed().expect("seeding should succeed");
        assert_eq!(driver.new_implementation().configured, expected);
        assert_eq!(driver.legacy_implementation().configured, expected);
    }

    #[test]
    fn rejected_configuration_stops_before_seeding() {
        let mut legacy = MapModel::named("legacy");
        legacy.reject_settings = true;
        let mut driver = DualDriver::new(toy_suite(7), MapModel::named("new"), legacy);
        let err = driver.seed().expect_err("legacy refuses the settings");
        assert_eq!(
            err,
            DriverError::ConfigureRejected {
                implementation: "legacy".to_string(),
                message: "unsupported settings".to_string(),
            }
        );
        assert!(err.to_string().contains("rejected suite configuration"));
        assert!(driver.new_implementation().fields.is_empty());
        assert_eq!(driver.state(), DriverState::Uninitialized);
    }

    #[test]
    fn seeded_values_respect_declared_distributions() {
        let state = toy_suite(11).generate_state().expect("plan is valid");
        let by_name: BTreeMap<_, _> = state.into_iter().collect();

        let origin = by_name["origin"].values()[0];
        assert!((0.0..1.0).contains(&origin));
        assert!(by_name["origin"].is_scalar());
        assert!(by_name["dxt"].values().iter().all(|v| (1.0..101.0).contains(v)));
        assert!(by_name["kbot"].values().iter().all(|v| *v == 0.0 || *v == 1.0));
        assert_eq!(by_name["coriolis"].shape(), &[4, 4]);
    }

    #[test]
    fn routines_run_in_declaration_order_on_shared_state() {
        let mut driver = DualDriver::new(
            toy_suite(3),
            MapModel::named("new"),
            MapModel::named("legacy"),
        );
        let report = driver.run().expect("suite should run");

        assert!(report.passed, "report: {report:?}");
        assert_eq!(driver.state(), DriverState::Done);
        let (new_impl, legacy_impl) = driver.into_implementations();
        assert_eq!(new_impl.calls, ["scale_grid:positional", "accumulate:positional"]);
        assert_eq!(legacy_impl.calls, ["scale_grid:keyword", "accumulate:keyword"]);

        // accumulate ran after scale_grid, so it summed the doubled grid.
        let doubled: f64 = new_impl.fields["dxt"].values().iter().sum();
        assert_eq!(new_impl.fields["total"], FieldValue::Scalar(doubled));
    }

    #[test]
    fn mismatch_is_reported_without_stopping_later_fields_or_routines() {
        let mut legacy = MapModel::named("legacy");
        legacy.perturb = Some(("total", 1.0));
        let mut driver = DualDriver::new(toy_suite(5), MapModel::named("new"), legacy);
        let report = driver.run().expect("mismatches are not fatal");

        assert!(!report.passed);
        assert_eq!(report.routines.len(), 2);
        assert_eq!(report.total_checks, 6);

        let first = &report.routines[0];
        assert!(!first.passed, "total is missing after the first routine");
        assert_eq!(first.failed_fields().collect::<Vec<_>>(), ["total"]);
        assert_eq!(first.checks[1].verdict, Verdict::MissingField);
        assert!(first.checks[2].passed(), "kbot is still checked after a failure");

        let second = &report.routines[1];
        assert_eq!(second.failed_fields().collect::<Vec<_>>(), ["total"]);
        assert_eq!(second.checks[1].verdict, Verdict::ValueMismatch);
        assert_eq!(report.failed_checks, 2);
    }

    #[test]
    fn routine_failure_is_fatal_and_names_the_implementation() {
        let mut legacy = MapModel::named("legacy");
        legacy.fail_on = Some("accumulate");
        let mut driver = DualDriver::new(toy_suite(1), MapModel::named("new"), legacy);
        let err = driver.run().expect_err("routine failure must propagate");
        assert_eq!(
            err,
            DriverError::RoutineFailed {
                implementation: "legacy".to_string(),
                routine: "accumulate".to_string(),
                message: "boom".to_string(),
            }
        );
        assert!(err.to_string().contains("legacy routine 'accumulate' failed"));
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut driver = DualDriver::new(
            toy_suite(2),
            MapModel::named("new"),
            MapModel::named("legacy"),
        );
        assert!(matches!(
            driver.execute_next(),
            Err(DriverError::InvalidTransition {
                state: DriverState::Uninitialized,
                ..
            })
        ));
        driver.seed().expect("seed");
        assert!(matches!(
            driver.seed(),
            Err(DriverError::InvalidTransition { .. })
        ));
        assert!(matches!(
            driver.compare_current(),
            Err(DriverError::InvalidTransition { .. })
        ));
        assert_eq!(
            driver.finish(),
            Err(DriverError::RoutinesPending { remaining: 2 })
        );

        assert_eq!(driver.execute_next().expect("first routine"), "scale_grid");
        assert!(matches!(
            driver.execute_next(),
            Err(DriverError::InvalidTransition {
                state: DriverState::Executed,
                ..
            })
        ));
        driver.compare_current().expect("compare");
        assert_eq!(driver.state(), DriverState::Compared);
    }

    #[test]
    fn suite_without_routines_finishes_from_seeded() {
        let mut suite = toy_suite(9);
        suite.routines.clear();
        let mut driver = DualDriver::new(suite, MapModel::named("new"), MapModel::named("legacy"));
        let report = driver.run().expect("empty suite runs");
        assert!(report.passed);
        assert_eq!(report.total_checks, 0);
    }

    #[test]
    fn invalid_seed_spec_is_rejected_before_seeding() {
        let mut suite = toy_suite(4);
        suite
            .seed_plan
            .push(SeedSpec::array("empty", vec![2], Distribution::Integer { low: 3, high: 3 }));
        let mut driver = DualDriver::new(suite, MapModel::named("new"), MapModel::named("legacy"));
        let err = driver.seed().expect_err("empty integer range");
        assert!(matches!(
            err,
            DriverError::InvalidSeedSpec { ref attribute, .. } if attribute == "empty"
        ));
        assert!(driver.new_implementation().fields.is_empty());
        assert_eq!(driver.state(), DriverState::Uninitialized);
    }

    #[test]
    fn integer_bounds_beyond_exact_f64_range_are_rejected() {
        let wide = |low, high| {
            let mut suite = toy_suite(4);
            suite.seed_plan = vec![SeedSpec::scalar("ids", Distribution::Integer { low, high })];
            suite.generate_state()
        };
        let err = wide(0, MAX_EXACT_INT + 1).expect_err("upper bound rounds");
        assert!(err.to_string().contains("exceeds +/-2^53"));
        assert!(wide(-MAX_EXACT_INT - 1, 0).is_err());
        let state = wide(MAX_EXACT_INT - 1, MAX_EXACT_INT).expect("exact bound is allowed");
        assert_eq!(state[0].1.values()[0], (MAX_EXACT_INT - 1) as f64);
    }

    #[test]
    fn report_serializes_with_reason_codes() {
        let mut legacy = MapModel::named("legacy");
        legacy.perturb = Some(("total", 1.0));
        let mut driver = DualDriver::new(toy_suite(5), MapModel::named("new"), legacy);
        let report = driver.run().expect("run");
        let value = serde_json::to_value(&report).expect("report serializes");
        assert_eq!(value["routines"][1]["checks"][1]["verdict"], "value_mismatch");
        assert_eq!(value["routines"][1]["checks"][1]["status"], "mismatch");
        assert_eq!(value["passed"], false);
    }

    proptest! {
        #[test]
        fn prop_same_seed_gives_same_outcomes(seed in any::<u64>()) {
            let run = |seed: u64| {
                let mut legacy = MapModel::named("legacy");
                legacy.perturb = Some(("total", 1e-3));
                let mut driver = DualDriver::new(toy_suite(seed), MapModel::named("new"), legacy);
                let report = driver.run().expect("suite runs");
                let outcomes: Vec<(String, String, bool)> = report
                    .routines
                    .iter()
                    .flat_map(|routine| {
                        routine.checks.iter().map(|check| {
                            (routine.routine.clone(), check.field.clone(), check.passed())
                        })
                    })
                    .collect();
                let (new_impl, _) = driver.into_implementations();
                (outcomes, new_impl.fields)
            };
            let (first_outcomes, first_state) = run(seed);
            let (second_outcomes, second_state) = run(seed);
            prop_assert_eq!(first_outcomes, second_outcomes);
            prop_assert_eq!(first_state, second_state);
        }
    }
}
