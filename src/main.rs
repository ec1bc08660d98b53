use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use kinetic_pic_electrostatic_2d::config::SimulationConfig;
use kinetic_pic_electrostatic_2d::output::{CsvLogger, DiagnosticOutput};
use kinetic_pic_electrostatic_2d::simulation::Simulation;

// usage: kinetic_pic_electrostatic_2d [config.json] [out_dir]
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SimulationConfig::from_json_file(&path)
            .with_context(|| format!("failed to load config {path}"))?,
        None => {
            info!("No config given, running the reference channel");
            SimulationConfig::default()
        }
    };
    let out_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("output"));

    println!("Integrator: {}, particles: {}", config.integrator, config.particles.count);
    println!("dt at step 0: {:e}", config.dt_at(0).unwrap_or(0.0));

    let mut sim = Simulation::new(config)?;
    let report = sim.solve_report();
    println!(
        "Grid {} x {}, potential solved in {} iterations (residual {:.2e})",
        sim.grid().nx(),
        sim.grid().ny(),
        report.iterations,
        report.relative_residual
    );

    let mut logger = CsvLogger::new(&out_dir)?;
    let diag = DiagnosticOutput;
    logger.log(&sim)?;

    while !sim.is_finished() {
        sim.step()?;
        logger.log(&sim)?;
        if sim.steps() % 500 == 0 {
            diag.print_status(&sim);
        }
    }
    logger.flush()?;

    let summary = sim.summary();
    diag.print_status(&sim);
    println!(
        "Done: {} steps, t = {:.4e} s, {} absorbed. Output in {}",
        summary.steps,
        summary.sim_time,
        summary.absorbed,
        out_dir.display()
    );
    Ok(())
}
