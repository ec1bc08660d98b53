use glam::DVec2;
use log::{info, warn};
use serde::Serialize;
use std::time::Instant;

use crate::config::SimulationConfig;
use crate::error::{PicError, Result};
use crate::particles::ParticleEngine;
use crate::world_2d::sparse::SolveReport;
use crate::world_2d::{ElectricField, Grid};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergySample {
    pub iteration: usize,
    pub sim_time: f64,
    pub kinetic: f64,
    pub potential: f64,
    pub total: f64,
    pub absorbed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub iteration: usize,
    pub particle: usize,
    pub pos: DVec2,
    pub vel: DVec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub sim_time: f64,
    pub absorbed: usize,
    pub energy: Vec<EnergySample>,
}

/// Grid, frozen field and particles of one run.
pub struct Simulation {
    config: SimulationConfig,
    grid: Grid,
    field: ElectricField,
    solve_report: SolveReport,
    engine: ParticleEngine,
    sim_time: f64,
    started: Instant,
    energy: Vec<EnergySample>,
    trajectory: Vec<TrajectoryPoint>,
}

impl Simulation {
    /// Build the grid, solve the field once and load the particles.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let grid = Grid::build(config.grid)?;
        let (field, solve_report) = ElectricField::solve(&grid, &config.solver)?;
        info!(
            "Field solved in {} iterations, relative residual {:.3e}",
            solve_report.iterations, solve_report.relative_residual
        );

        let mut engine = ParticleEngine::new(config.species, config.integrator, &grid)?
            .with_magnetic_field(config.magnetic_field_z)
            .with_parallel(config.parallel);
        engine.load_inlet(config.particles.count, config.particles.v0, config.particles.loading);
        if config.magnetic_field_z != 0.0 && !config.integrator.is_magnetized() {
            warn!("{} ignores the magnetic field", config.integrator);
        }

        let mut sim = Self {
            config,
            grid,
            field,
            solve_report,
            engine,
            sim_time: 0.0,
            started: Instant::now(),
            energy: Vec::new(),
            trajectory: Vec::new(),
        };
        sim.record()?;
        Ok(sim)
    }

    pub fn config(&self) -> &SimulationConfig { &self.config }

    pub fn grid(&self) -> &Grid { &self.grid }

    pub fn field(&self) -> &ElectricField { &self.field }

    pub fn solve_report(&self) -> SolveReport { self.solve_report }

    pub fn engine(&self) -> &ParticleEngine { &self.engine }

    pub fn steps(&self) -> usize { self.engine.step_count() }

    pub fn sim_time(&self) -> f64 { self.sim_time }

    /// Seconds of wall clock since construction.
    pub fn wall_time(&self) -> f64 { self.started.elapsed().as_secs_f64() }

    pub fn energy_history(&self) -> &[EnergySample] { &self.energy }

    pub fn trajectory(&self) -> &[TrajectoryPoint] { &self.trajectory }

    pub fn last_energy(&self) -> Option<&EnergySample> { self.energy.last() }

    pub fn is_finished(&self) -> bool {
        let steps = self.steps();
        steps >= self.config.stop.max_steps
            || self.config.dt_at(steps).is_none()
            || (self.config.stop.stop_when_all_absorbed && self.engine.all_absorbed())
    }

    /// Advance every particle once with the current step size.
    pub fn step(&mut self) -> Result<()> {
        let dt = self.config.dt_at(self.steps()).ok_or_else(|| {
            PicError::InvalidConfig(format!("time-step schedule ends at step {}", self.steps()))
        })?;
        self.engine.push(&self.field, dt)?;
        self.sim_time += dt;
        self.record()
    }

    /// Step until the stop condition holds.
    pub fn run(&mut self) -> Result<RunSummary> {
        while !self.is_finished() {
            self.step()?;
        }
        info!(
            "Run finished after {} steps, t = {:.4e} s, {}/{} absorbed",
            self.steps(),
            self.sim_time,
            self.engine.num_absorbed(),
            self.engine.num_particles()
        );
        Ok(self.summary())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            steps: self.steps(),
            sim_time: self.sim_time,
            absorbed: self.engine.num_absorbed(),
            energy: self.energy.clone(),
        }
    }

    fn record(&mut self) -> Result<()> {
        let e = self.engine.energy(&self.field)?;
        let iteration = self.steps();
        self.energy.push(EnergySample {
            iteration,
            sim_time: self.sim_time,
            kinetic: e.kinetic,
            potential: e.potential,
            total: e.total,
            absorbed: self.engine.num_absorbed(),
        });
        if self.config.record_trajectory {
            for (particle, p) in self.engine.particles().iter().enumerate() {
                self.trajectory.push(TrajectoryPoint { iteration, particle, pos: p.pos(), vel: p.vel() });
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParticleSpec, StopCondition, TimeStep};
    use crate::particles::{Loading, Species};
    use crate::world_2d::GridSpec;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            grid: GridSpec {
                h: 0.1,
                length: 2.0,
                height: 1.0,
                wall: None,
                v_in: 2.0,
                v_out: 0.0,
                v_wall: 0.0,
            },
            species: Species { charge: 1.0, mass: 1.0 },
            particles: ParticleSpec { count: 1, v0: 0.5, loading: Loading::InletUniform },
            time_step: TimeStep::Fixed(0.05),
            stop: StopCondition { max_steps: 1000, stop_when_all_absorbed: true },
            record_trajectory: true,
            ..Default::default()
        }
    }

    #[test]
    fn runs_until_everything_is_absorbed() {
        let mut config = small_config();
        config.particles.count = 3;
        let mut sim = Simulation::new(config).unwrap();
        let summary = sim.run().unwrap();
        assert_eq!(summary.absorbed, 3);
        assert!(summary.steps < 1000);
        assert_eq!(summary.energy.len(), summary.steps + 1);
        assert_eq!(sim.trajectory().len(), 3 * (summary.steps + 1));
        assert!(sim.is_finished());
    }

    #[test]
    fn stops_at_max_steps() {
        let mut config = small_config();
        config.stop.max_steps = 4;
        let summary = Simulation::new(config).unwrap().run().unwrap();
        assert_eq!(summary.steps, 4);
        assert!((summary.sim_time - 0.2).abs() < 1e-12);
    }

    #[test]
    fn schedule_bounds_the_run() {
        let mut config = small_config();
        config.time_step = TimeStep::Schedule(vec![0.01, 0.02, 0.03]);
        let mut sim = Simulation::new(config).unwrap();
        let summary = sim.run().unwrap();
        assert_eq!(summary.steps, 3);
        assert!((summary.sim_time - 0.06).abs() < 1e-12);
        assert!(matches!(sim.step(), Err(PicError::InvalidConfig(_))));
    }
}
