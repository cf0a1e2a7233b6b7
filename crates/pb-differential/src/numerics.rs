//! The canned grid/topography/initial-conditions differential suite.

use std::collections::BTreeMap;

use pb_compare::Tolerance;
use pb_core::GridDims;

use crate::{DifferentialSuite, Distribution, SeedSpec, SettingValue, TestRoutineSpec};

pub const NUMERICS_GRID: GridDims = GridDims::new(70, 60, 50);

/// Ghost cells on each side of the horizontal axes.
pub const HALO: usize = 2;

pub const NUMERICS_ROUTINES: [&str; 4] = [
    "calc_grid",
    "calc_topo",
    "calc_beta",
    "calc_initial_conditions",
];

pub const NUMERICS_FIELDS: [&str; 36] = [
    "zt",
    "zw",
    "cosu",
    "cost",
    "tantr",
    "area_u",
    "area_v",
    "area_t",
    "beta",
    "xt",
    "xu",
    "dxu",
    "dxt",
    "yt",
    "yu",
    "dyu",
    "dyt",
    "dzt",
    "dzw",
    "rho",
    "salt",
    "temp",
    "Nsqr",
    "Hd",
    "int_drhodT",
    "int_drhodS",
    "ht",
    "hu",
    "hv",
    "hur",
    "hvr",
    "maskT",
    "maskW",
    "maskU",
    "maskV",
    "kbot",
];

#[must_use]
pub fn numerics_suite(seed: u64) -> DifferentialSuite {
    numerics_suite_for(NUMERICS_GRID, seed)
}

/// Same declaration as [`numerics_suite`] on an arbitrary grid.
#[must_use]
pub fn numerics_suite_for(grid: GridDims, seed: u64) -> DifferentialSuite {
    let settings = BTreeMap::from([
        ("enable_cyclic_x".to_string(), SettingValue::Flag(true)),
        ("coord_degree".to_string(), SettingValue::Flag(false)),
    ]);

    DifferentialSuite {
        name: "numerics".to_string(),
        grid,
        settings,
        seed,
        seed_plan: seed_plan(grid),
        routines: NUMERICS_ROUTINES
            .iter()
            .map(|name| TestRoutineSpec::state_only(*name))
            .collect(),
        compared_fields: NUMERICS_FIELDS.iter().map(|name| name.to_string()).collect(),
        tolerance: Tolerance::DEFAULT,
    }
}

fn seed_plan(grid: GridDims) -> Vec<SeedSpec> {
    let nx = grid.nx + 2 * HALO;
    let ny = grid.ny + 2 * HALO;
    let nz = grid.nz;

    let unit = Distribution::Uniform {
        low: 0.0,
        high: 1.0,
    };
    let spacing = Distribution::Uniform {
        low: 1.0,
        high: 101.0,
    };
    let signed = Distribution::Uniform {
        low: -1.0,
        high: 1.0,
    };

    let mut plan = vec![
        SeedSpec::scalar("x_origin", unit),
        SeedSpec::scalar("y_origin", unit),
    ];
    for name in ["dxt", "dxu", "xt", "xu"] {
        plan.push(SeedSpec::array(name, vec![nx], spacing));
    }
    for name in ["dyt", "dyu", "yt", "yu"] {
        plan.push(SeedSpec::array(name, vec![ny], spacing));
    }
    for name in ["dzt", "dzw", "zw", "zt"] {
        plan.push(SeedSpec::array(name, vec![nz], unit));
    }
    for name in ["cosu", "cost", "tantr"] {
        plan.push(SeedSpec::array(name, vec![ny], signed));
    }
    for name in ["coriolis_t", "area_u", "area_v", "area_t"] {
        plan.push(SeedSpec::array(
            name,
            vec![nx, ny],
            Distribution::StandardNormal,
        ));
    }
    for name in ["salt", "temp"] {
        plan.push(SeedSpec::array(name, vec![nx, ny, nz, 3], unit));
    }
    plan.push(SeedSpec::array(
        "kbot",
        vec![nx, ny],
        Distribution::Integer {
            low: 0,
            high: i64::try_from(nz).unwrap_or(i64::MAX),
        },
    ));
    plan
}
