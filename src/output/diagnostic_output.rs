use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::Path;
use serde::Serialize;

use crate::simulation::{EnergySample, Simulation};

#[derive(Debug, Clone, Copy)]
pub struct TimeInfo {
    pub iteration: usize,
    pub sim_time: f64,
    pub wall_time: f64,
}

impl TimeInfo {
    pub fn from_simulation(sim: &Simulation) -> Self {
        Self { iteration: sim.steps(), sim_time: sim.sim_time(), wall_time: sim.wall_time() }
    }
}

#[derive(Debug, Serialize)]
struct EnergyRow {
    iteration: usize,
    sim_time: f64,
    wall_time: f64,
    kinetic: f64,
    potential: f64,
    total: f64,
    absorbed: usize,
}

#[derive(Debug, Serialize)]
struct TrajectoryRow {
    iteration: usize,
    particle: usize,
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
}

pub struct CsvLogger {
    energy_wtr: csv::Writer<BufWriter<File>>,
    trajectory_wtr: csv::Writer<BufWriter<File>>,
    flush_every: usize,
}

fn create_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(BufWriter::new(file)))
}

impl CsvLogger {
    /// Creates `energy.csv` and `trajectory.csv` under `out_dir`.
    pub fn new(out_dir: impl AsRef<Path>) -> Result<Self> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;

        let energy_wtr = create_writer(&out_dir.join("energy.csv"))?;
        let trajectory_wtr = create_writer(&out_dir.join("trajectory.csv"))?;
        Ok(Self { energy_wtr, trajectory_wtr, flush_every: 100 })
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every.max(1);
        self
    }

    pub fn log_energy_row(&mut self, t_info: &TimeInfo, sample: &EnergySample) -> Result<()> {
        let row = EnergyRow {
            iteration: t_info.iteration,
            sim_time: t_info.sim_time,
            wall_time: t_info.wall_time,
            kinetic: sample.kinetic,
            potential: sample.potential,
            total: sample.total,
            absorbed: sample.absorbed,
        };
        self.energy_wtr.serialize(&row).context("csv serialize failed")?;

        if t_info.iteration % self.flush_every == 0 {
            self.energy_wtr.flush()?;
        }
        Ok(())
    }

    pub fn log_trajectory_rows(&mut self, t_info: &TimeInfo, sim: &Simulation) -> Result<()> {
        for (particle, p) in sim.engine().particles().iter().enumerate() {
            let (pos, vel) = (p.pos(), p.vel());
            let row = TrajectoryRow {
                iteration: t_info.iteration,
                particle,
                x: pos.x,
                y: pos.y,
                vx: vel.x,
                vy: vel.y,
            };
            self.trajectory_wtr.serialize(row)?;
        }
        if t_info.iteration % self.flush_every == 0 {
            self.trajectory_wtr.flush()?;
        }
        Ok(())
    }

    /// Append the current state of `sim` to both files.
    pub fn log(&mut self, sim: &Simulation) -> Result<()> {
        let t_info = TimeInfo::from_simulation(sim);
        if let Some(sample) = sim.last_energy() {
            self.log_energy_row(&t_info, sample)?;
        }
        self.log_trajectory_rows(&t_info, sim)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.energy_wtr.flush()?;
        self.trajectory_wtr.flush()?;
        Ok(())
    }
}

pub struct DiagnosticOutput;

impl DiagnosticOutput {

    pub fn print_status(&self, sim: &Simulation) {
        let engine = sim.engine();
        print!("ts: {}, t: {:.4e}, ", sim.steps(), sim.sim_time());
        print!("particles: {}, absorbed: {}", engine.num_particles(), engine.num_absorbed());
        if let Some(e) = sim.last_energy() {
            print!(", E: {:.6e}", e.total);
        }
        println!("");
    }

}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimulationConfig, TimeStep};
    use crate::particles::Species;
    use crate::world_2d::GridSpec;

    #[test]
    fn writes_energy_and_trajectory_files() {
        let mut config = SimulationConfig {
            grid: GridSpec {
                h: 0.25,
                length: 1.0,
                height: 1.0,
                wall: None,
                v_in: 1.0,
                v_out: 0.0,
                v_wall: 0.0,
            },
            species: Species { charge: 1.0, mass: 1.0 },
            time_step: TimeStep::Fixed(0.1),
            ..Default::default()
        };
        config.particles.count = 2;
        config.particles.v0 = 0.1;
        config.stop.max_steps = 3;

        let out_dir = std::env::temp_dir().join(format!("pic2d_csv_{}", std::process::id()));
        let mut sim = Simulation::new(config).unwrap();
        let mut logger = CsvLogger::new(&out_dir).unwrap().with_flush_every(1);
        logger.log(&sim).unwrap();
        while !sim.is_finished() {
            sim.step().unwrap();
            logger.log(&sim).unwrap();
        }
        logger.flush().unwrap();

        let energy = std::fs::read_to_string(out_dir.join("energy.csv")).unwrap();
        let mut lines = energy.lines();
        assert_eq!(
            lines.next(),
            Some("iteration,sim_time,wall_time,kinetic,potential,total,absorbed")
        );
        assert_eq!(lines.count(), 4);

        let trajectory = std::fs::read_to_string(out_dir.join("trajectory.csv")).unwrap();
        assert!(trajectory.starts_with("iteration,particle,x,y,vx,vy"));
        assert_eq!(trajectory.lines().count(), 1 + 2 * 4);

        std::fs::remove_dir_all(&out_dir).unwrap();
    }
}
