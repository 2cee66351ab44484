#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Equilibrium force on an F = 1 -> F' = 2 atom in a one-dimensional σ+/σ-
//! optical molasses, mapped over velocity.
//!
//! Usage: `molasses [config.toml]`

use std::path::PathBuf;
use anyhow::Context;
use indexmap::IndexMap;
use ndarray as nd;
use num_complex::Complex64 as C64;
use rayon::iter::{ IntoParallelIterator, ParallelIterator };
use tracing_subscriber::{ fmt, prelude::*, EnvFilter };
use obe_sim::{
    config::ObeConfig,
    fields::{ ConstantField, LaserBeams, LaserField },
    hamiltonian::{ BlockHamiltonian, BlockParams },
    liouville::OperatorSet,
    obe::{ EquilibriumForce, ForceProfile, InitialRho, Obe, ProfileOptions },
    states::{ dqij_two_bare_hyperfine, single_f },
};

const G_F: f64 = 0.5; // ground g-factor
const G_FP: f64 = 1.0 / 3.0; // excited g-factor
const SAT: f64 = 1.0; // per-beam saturation parameter
const DET: f64 = -2.5; // detuning, in units of the decay rate
const VMAX: f64 = 2.0; // in units of Γ / k
const NV: usize = 81;

fn init_logging(level: &str) {
    let filter
        = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn hamiltonian() -> anyhow::Result<BlockHamiltonian> {
    let (H_g, mu_g) = single_f(1.0, G_F);
    let (H_e, mu_e) = single_f(2.0, G_FP);
    let H = BlockHamiltonian::from_two_manifolds(
        H_g,
        H_e + nd::Array2::from_diag_elem(5, C64::from(-DET)),
        mu_g,
        mu_e,
        dqij_two_bare_hyperfine(1.0, 2.0, true),
        BlockParams::default(),
    )?;
    Ok(H)
}

fn main() -> anyhow::Result<()> {
    init_logging("info");

    let config
        = match std::env::args().nth(1) {
            Some(path) => {
                ObeConfig::from_file(&path)
                    .with_context(|| format!("failed to load config '{path}'"))?
            },
            None => ObeConfig::default(),
        };

    let H = hamiltonian()?;
    tracing::info!("\n{}", H);
    let ops: OperatorSet<f64> = OperatorSet::new(&H, &config)?;

    // the excited-state energy offset carries the detuning; beams are
    // resonant in the rotating frame
    let sigma_p = [C64::from(0.0), C64::from(0.0), C64::from(1.0)];
    let sigma_m = [C64::from(1.0), C64::from(0.0), C64::from(0.0)];
    let lasers: IndexMap<String, LaserBeams>
        = [(
            "g->e".to_string(),
            LaserBeams::counterpropagating([0.0, 0.0, 1.0], sigma_p, sigma_m, SAT, 0.0),
        )]
        .into_iter()
        .collect();
    let B = ConstantField::default();

    let V: Vec<[f64; 3]>
        = nd::Array1::linspace(-VMAX, VMAX, NV).iter()
        .map(|v| [0.0, 0.0, *v])
        .collect();
    let num_beams
        = lasers.iter().map(|(key, beams)| (key.clone(), beams.num_beams()));
    let mut profile = ForceProfile::new(vec![[0.0; 3]], V, num_beams);
    let opts = ProfileOptions {
        initial_rho: InitialRho::Equally,
        deltat_v: Some(4.0),
        deltat_tmax: 2000.0,
        equilibrium: config.equilibrium.clone(),
        ..ProfileOptions::default()
    };

    let points: Vec<_> = profile.grid().collect();
    let results: Vec<((usize, usize), EquilibriumForce)>
        = points.into_par_iter()
        .map(|(idx, r, v)| -> anyhow::Result<_> {
            let mut obe = Obe::new(&ops, &lasers, &B, config.clone())?;
            obe.set_initial_position_and_velocity(r, v);
            match opts.initial_rho {
                InitialRho::Equally => obe.set_initial_rho_equally()?,
                InitialRho::RateEq => obe.set_initial_rho_from_rateeq()?,
            }
            let force = obe.find_equilibrium_force(&opts.config_at(r, v))?;
            if !force.converged() {
                tracing::warn!(v = v[2], iterations = force.iterations, "no convergence");
            }
            tracing::debug!(v = v[2], f = force.f[2], "done");
            Ok((idx, force))
        })
        .collect::<anyhow::Result<_>>()?;
    results.iter().for_each(|(idx, force)| { profile.store_data(*idx, force); });

    let outdir = PathBuf::from("output");
    std::fs::create_dir_all(&outdir)?;
    let outfile = outdir.join("molasses.npz");
    profile.save_npz(&outfile)?;
    tracing::info!(path = %outfile.display(), "wrote force profile");
    Ok(())
}
