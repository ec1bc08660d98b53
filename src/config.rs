//! Run configuration, loadable from JSON.
//!
//! `SimulationConfig::default()` is the reference thruster-channel run:
//! xenon ions entering a 5 cm x 2 cm channel with a biased wall.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PicError, Result};
use crate::particles::{Integrator, Loading, Species};
use crate::world_2d::{GridSpec, SolverConfig, SolverMethod};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSpec {
    pub count: usize,
    /// Injection speed scale (m/s).
    pub v0: f64,
    pub loading: Loading,
}

impl Default for ParticleSpec {
    fn default() -> Self {
        Self { count: 1, v0: 100.0, loading: Loading::InletUniform }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeStep {
    Fixed(f64),
    /// One entry per step; the run ends when the schedule is used up.
    Schedule(Vec<f64>),
    /// `dt = h / sqrt(2 q |Vin - Vout| / m)`: one cell per step at the
    /// speed gained across the full inlet-outlet drop.
    Cfl,
}

impl Default for TimeStep {
    fn default() -> Self {
        TimeStep::Cfl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopCondition {
    pub max_steps: usize,
    pub stop_when_all_absorbed: bool,
}

impl Default for StopCondition {
    fn default() -> Self {
        Self { max_steps: 10_000, stop_when_all_absorbed: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub grid: GridSpec,
    pub species: Species,
    pub particles: ParticleSpec,
    pub time_step: TimeStep,
    pub integrator: Integrator,
    /// Out-of-plane field (T), seen only by the magnetized pushers.
    pub magnetic_field_z: f64,
    pub stop: StopCondition,
    pub solver: SolverConfig,
    pub parallel: bool,
    /// Keep every particle's state after every step.
    pub record_trajectory: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            grid: GridSpec::default(),
            species: Species::default(),
            particles: ParticleSpec::default(),
            time_step: TimeStep::default(),
            integrator: Integrator::default(),
            magnetic_field_z: 0.0,
            stop: StopCondition::default(),
            solver: SolverConfig::default(),
            parallel: false,
            record_trajectory: false,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PicError::InvalidConfig(format!("bad config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PicError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        self.species.validate()?;

        let bad = |msg: String| -> Result<()> { Err(PicError::InvalidConfig(msg)) };
        if !(self.particles.v0.is_finite()) {
            return bad(format!("v0 must be finite, got {}", self.particles.v0));
        }
        if !self.magnetic_field_z.is_finite() {
            return bad(format!("magnetic field must be finite, got {}", self.magnetic_field_z));
        }
        match &self.time_step {
            TimeStep::Fixed(dt) if !(*dt > 0.0 && dt.is_finite()) => {
                return bad(format!("time step must be positive, got {dt}"));
            }
            TimeStep::Schedule(dts) if dts.iter().any(|dt| !(*dt > 0.0 && dt.is_finite())) => {
                return bad("every scheduled time step must be positive".to_string());
            }
            TimeStep::Cfl if self.grid.v_in == self.grid.v_out => {
                return bad("a CFL time step needs Vin != Vout".to_string());
            }
            TimeStep::Cfl if self.species.charge == 0.0 => {
                return bad("a CFL time step needs a charged species".to_string());
            }
            TimeStep::Cfl if !(self.cfl_dt() > 0.0 && self.cfl_dt().is_finite()) => {
                return bad(format!("CFL time step evaluates to {}", self.cfl_dt()));
            }
            _ => {}
        }
        if let SolverMethod::Sor { omega } = self.solver.method {
            if !(omega > 0.0 && omega < 2.0) {
                return bad(format!("SOR relaxation must lie in (0, 2), got {omega}"));
            }
        }
        if !(self.solver.tolerance > 0.0) || self.solver.max_iterations == 0 {
            return bad(format!("solver needs a positive tolerance and budget: {:?}", self.solver));
        }
        Ok(())
    }

    /// Step size for step `k`, or `None` once a schedule is used up.
    pub fn dt_at(&self, k: usize) -> Option<f64> {
        match &self.time_step {
            TimeStep::Fixed(dt) => Some(*dt),
            TimeStep::Schedule(dts) => dts.get(k).copied(),
            TimeStep::Cfl => Some(self.cfl_dt()),
        }
    }

    pub fn cfl_dt(&self) -> f64 {
        let drop = (self.grid.v_in - self.grid.v_out).abs();
        self.grid.h / (2.0 * self.species.charge.abs() * drop / self.species.mass).sqrt()
    }
}
