use glam::{DVec2, DVec3};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::integrator::{AccelerationModel, Integrator};
use crate::constants::{M_XE, QE};
use crate::error::{PicError, Result};
use crate::world_2d::{DomainPolicy, ElectricField, Grid, WallSpec};

/// Charge and mass shared by every particle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Species {
    /// C
    pub charge: f64,
    /// kg
    pub mass: f64,
}

impl Default for Species {
    fn default() -> Self {
        // singly ionized xenon
        Self { charge: QE, mass: M_XE }
    }
}

impl Species {
    pub fn validate(&self) -> Result<()> {
        if !(self.mass > 0.0 && self.mass.is_finite()) || !self.charge.is_finite() {
            return Err(PicError::InvalidConfig(format!(
                "species needs a positive mass and finite charge, got q = {}, m = {}",
                self.charge, self.mass
            )));
        }
        Ok(())
    }

    pub fn charge_per_mass(&self) -> f64 {
        self.charge / self.mass
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pos: DVec2,
    vel: DVec2,
    absorbed: bool,
}

impl Particle {
    pub fn new(pos: DVec2, vel: DVec2) -> Self {
        Self { pos, vel, absorbed: false }
    }

    pub fn pos(&self) -> DVec2 { self.pos }

    pub fn vel(&self) -> DVec2 { self.vel }

    /// Permanently stopped at the outlet.
    pub fn is_absorbed(&self) -> bool { self.absorbed }
}

/// How the initial particles are placed along the inlet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Loading {
    /// `y_k = height (k + 1) / (n + 1)`, velocity `(v0, 0)`.
    InletUniform,
    /// Uniformly random `y`, velocity `(v0 u, 0)` with `u` in `[0, 1)`.
    InletRandom { seed: u64 },
}

impl Default for Loading {
    fn default() -> Self {
        Loading::InletUniform
    }
}

/// Acceleration of one species in the frozen field.
#[derive(Debug, Clone, Copy)]
pub struct FieldAcceleration<'a> {
    field: &'a ElectricField,
    charge_per_mass: f64,
    gyration: DVec3,
    policy: DomainPolicy,
}

impl<'a> FieldAcceleration<'a> {
    pub fn new(field: &'a ElectricField, species: &Species, policy: DomainPolicy) -> Self {
        Self { field, charge_per_mass: species.charge_per_mass(), gyration: DVec3::ZERO, policy }
    }

    /// Uniform out-of-plane magnetic field `B_z` (T).
    pub fn with_magnetic_field(mut self, b_z: f64) -> Self {
        self.gyration = DVec3::new(0.0, 0.0, self.charge_per_mass * b_z);
        self
    }
}

impl AccelerationModel for FieldAcceleration<'_> {
    fn acceleration(&self, pos: DVec2) -> Result<DVec2> {
        Ok(self.field.sample_field(pos, self.policy)? * self.charge_per_mass)
    }

    fn gyration(&self, _pos: DVec2) -> DVec3 {
        self.gyration
    }
}

/// What happened to a particle at the end of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryEvent {
    Free,
    /// Already absorbed before the step; nothing moved.
    Frozen,
    Absorbed,
    ReflectedInlet,
    ReflectedBottom,
    ReflectedTop,
    WallTop,
    WallSide,
}

/// Surfaces the collision rules test against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundaries {
    pub length: f64,
    pub height: f64,
    pub wall: Option<WallSpec>,
}

impl Boundaries {
    pub fn from_grid(grid: &Grid) -> Self {
        Self { length: grid.length(), height: grid.height(), wall: grid.wall().copied() }
    }

    /// Resolve the tentative state `(x_new, v_new)` of a particle that was at
    /// `pre` before the step. Returns the committed state and the last event.
    pub fn resolve(&self, pre: DVec2, x_new: DVec2, v_new: DVec2) -> (DVec2, DVec2, BoundaryEvent) {
        if x_new.x >= self.length {
            return (x_new, DVec2::ZERO, BoundaryEvent::Absorbed);
        }

        let (mut pos, mut vel) = (x_new, v_new);
        let mut event = BoundaryEvent::Free;

        if pos.y <= 0.0 {
            pos.y = (-pos.y).min(self.height);
            vel.y = -vel.y;
            event = BoundaryEvent::ReflectedBottom;
        } else if pos.y >= self.height {
            pos.y = (2.0 * self.height - pos.y).max(0.0);
            vel.y = -vel.y;
            event = BoundaryEvent::ReflectedTop;
        }

        if pos.x < 0.0 {
            pos.x = (-pos.x).min(self.length);
            vel.x = -vel.x;
            event = BoundaryEvent::ReflectedInlet;
        }

        if let Some(wall) = self.wall.filter(|w| w.contains(pos)) {
            if pre.y >= wall.h_wall {
                // came down through (or from) the top face
                pos.y = 2.0 * wall.h_wall - pos.y;
                vel.y = -vel.y;
                event = BoundaryEvent::WallTop;
            } else {
                if pre.x < wall.x_wall {
                    pos.x = 2.0 * wall.x_wall - pos.x;
                } else if pre.x > wall.x_max() {
                    pos.x = 2.0 * wall.x_max() - pos.x;
                }
                vel.x = -vel.x;
                event = BoundaryEvent::WallSide;
            }
        }

        (pos, vel, event)
    }
}

/// Kinetic, potential and total energy of the particle ensemble (J).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EnergyInfo {
    pub kinetic: f64,
    pub potential: f64,
    pub total: f64,
}

fn push_one<A>(
    particle: &mut Particle,
    index: usize,
    step: usize,
    integrator: Integrator,
    accel: &A,
    bounds: &Boundaries,
    dt: f64,
) -> Result<BoundaryEvent>
    where A: AccelerationModel + ?Sized
{
    if particle.absorbed {
        return Ok(BoundaryEvent::Frozen);
    }

    // snapshot before the integrator touches anything
    let pre = *particle;
    let (x_new, v_new) = integrator.step(pre.pos, pre.vel, accel, dt)?;
    if !(x_new.is_finite() && v_new.is_finite()) {
        return Err(PicError::Divergence { index, step });
    }

    let (pos, vel, event) = bounds.resolve(pre.pos, x_new, v_new);
    particle.pos = pos;
    particle.vel = vel;
    particle.absorbed = event == BoundaryEvent::Absorbed;
    Ok(event)
}

/// Owns the particle state and advances it through a frozen field.
#[derive(Debug, Clone)]
pub struct ParticleEngine {
    species: Species,
    integrator: Integrator,
    bounds: Boundaries,
    magnetic_field_z: f64,
    parallel: bool,
    particles: Vec<Particle>,
    step_count: usize,
}

impl ParticleEngine {
    pub fn new(species: Species, integrator: Integrator, grid: &Grid) -> Result<Self> {
        species.validate()?;
        Ok(Self {
            species,
            integrator,
            bounds: Boundaries::from_grid(grid),
            magnetic_field_z: 0.0,
            parallel: false,
            particles: Vec::new(),
            step_count: 0,
        })
    }

    /// Uniform out-of-plane magnetic field seen by the magnetized pushers (T).
    pub fn with_magnetic_field(mut self, b_z: f64) -> Self {
        self.magnetic_field_z = b_z;
        self
    }

    /// Push particles on the rayon pool, partitioned by particle index.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn species(&self) -> &Species { &self.species }

    pub fn integrator(&self) -> Integrator { self.integrator }

    pub fn boundaries(&self) -> &Boundaries { &self.bounds }

    pub fn step_count(&self) -> usize { self.step_count }

    pub fn add_particle(&mut self, pos: DVec2, vel: DVec2) {
        self.particles.push(Particle::new(pos, vel));
    }

    /// Place `count` particles on the inlet face `x = 0`.
    pub fn load_inlet(&mut self, count: usize, v0: f64, loading: Loading) {
        let height = self.bounds.height;
        self.particles.reserve(count);
        match loading {
            Loading::InletUniform => {
                for k in 0..count {
                    let y = height * (k + 1) as f64 / (count + 1) as f64;
                    self.add_particle(DVec2::new(0.0, y), DVec2::new(v0, 0.0));
                }
            }
            Loading::InletRandom { seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..count {
                    let y = rng.gen_range(0.0..1.0) * height;
                    let vx = rng.gen_range(0.0..1.0) * v0;
                    self.add_particle(DVec2::new(0.0, y), DVec2::new(vx, 0.0));
                }
            }
        }
        info!("Loaded {count} particles on the inlet ({loading:?}, v0 = {v0})");
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particle(&self, i: usize) -> Result<&Particle> {
        self.particles.get(i).ok_or(PicError::OutOfRange { index: i, len: self.particles.len() })
    }

    pub fn get_position(&self, i: usize) -> Result<DVec2> {
        Ok(self.particle(i)?.pos)
    }

    pub fn get_velocity(&self, i: usize) -> Result<DVec2> {
        Ok(self.particle(i)?.vel)
    }

    pub fn positions(&self) -> Vec<DVec2> {
        self.particles.iter().map(|p| p.pos).collect()
    }

    pub fn velocities(&self) -> Vec<DVec2> {
        self.particles.iter().map(|p| p.vel).collect()
    }

    pub fn num_absorbed(&self) -> usize {
        self.particles.iter().filter(|p| p.absorbed).count()
    }

    pub fn all_absorbed(&self) -> bool {
        self.particles.iter().all(|p| p.absorbed)
    }

    /// Advance every particle by one step of `dt` through `field`.
    pub fn push(&mut self, field: &ElectricField, dt: f64) -> Result<()> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(PicError::InvalidConfig(format!("time step must be positive, got {dt}")));
        }
        let step = self.step_count;
        let integrator = self.integrator;
        let bounds = self.bounds;
        // Stages may probe just past a boundary on the step that crosses it;
        // the collision rules settle the particle afterwards.
        let accel = FieldAcceleration::new(field, &self.species, DomainPolicy::Clamp)
            .with_magnetic_field(if integrator.is_magnetized() { self.magnetic_field_z } else { 0.0 });

        if self.parallel {
            self.particles
                .par_iter_mut()
                .enumerate()
                .try_for_each(|(i, p)| push_one(p, i, step, integrator, &accel, &bounds, dt).map(|_| ()))?;
        } else {
            for (i, p) in self.particles.iter_mut().enumerate() {
                let event = push_one(p, i, step, integrator, &accel, &bounds, dt)?;
                if event == BoundaryEvent::Absorbed {
                    debug!("particle {i} absorbed at step {step}, x = {:.6}", p.pos.x);
                }
            }
        }

        self.step_count += 1;
        Ok(())
    }

    pub fn momentum(&self) -> DVec2 {
        let mut mom = DVec2::ZERO;
        for p in self.particles.iter() {
            mom += p.vel;
        }
        mom * self.species.mass
    }

    pub fn kinetic_energy(&self) -> f64 {
        // 1/2 m v^2
        let ke: f64 = self.particles.iter().map(|p| p.vel.length_squared()).sum();
        0.5 * self.species.mass * ke
    }

    /// `sum q V(x)`. Absorbed particles past the outlet read the outlet potential.
    pub fn potential_energy(&self, field: &ElectricField) -> Result<f64> {
        let mut pe = 0.0;
        for p in self.particles.iter() {
            pe += field.sample_potential(p.pos, DomainPolicy::Clamp)?;
        }
        Ok(pe * self.species.charge)
    }

    /// Energy of particle `i` alone.
    pub fn particle_energy(&self, i: usize, field: &ElectricField) -> Result<EnergyInfo> {
        let p = self.particle(i)?;
        let kinetic = 0.5 * self.species.mass * p.vel.length_squared();
        let potential = self.species.charge * field.sample_potential(p.pos, DomainPolicy::Clamp)?;
        Ok(EnergyInfo { kinetic, potential, total: kinetic + potential })
    }

    pub fn energy(&self, field: &ElectricField) -> Result<EnergyInfo> {
        let kinetic = self.kinetic_energy();
        let potential = self.potential_energy(field)?;
        Ok(EnergyInfo { kinetic, potential, total: kinetic + potential })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_2d::{GridSpec, SolverConfig};
    use approx::assert_abs_diff_eq;

    fn test_grid(wall: Option<WallSpec>) -> Grid {
        Grid::build(GridSpec {
            h: 0.1,
            length: 2.0,
            height: 1.0,
            wall,
            v_in: 0.0,
            v_out: 0.0,
            v_wall: 0.0,
        })
        .unwrap()
    }

    fn unit_species() -> Species {
        Species { charge: 1.0, mass: 1.0 }
    }

    fn bounds() -> Boundaries {
        Boundaries {
            length: 2.0,
            height: 1.0,
            wall: Some(WallSpec { x_wall: 0.8, w_wall: 0.4, h_wall: 0.3 }),
        }
    }

    #[test]
    fn bottom_and_top_flip_only_normal_velocity() {
        let b = bounds();
        let v = DVec2::new(0.7, -0.4);
        let (pos, vel, event) = b.resolve(DVec2::new(0.2, 0.02), DVec2::new(0.27, -0.02), v);
        assert_eq!(event, BoundaryEvent::ReflectedBottom);
        assert_eq!(vel, DVec2::new(0.7, 0.4));
        assert_abs_diff_eq!(pos.y, 0.02, epsilon = 1e-15);
        assert_abs_diff_eq!(vel.length(), v.length(), epsilon = 1e-15);

        let (pos, vel, event) = b.resolve(DVec2::new(0.2, 0.99), DVec2::new(0.3, 1.01), DVec2::new(0.1, 0.2));
        assert_eq!(event, BoundaryEvent::ReflectedTop);
        assert_eq!(vel, DVec2::new(0.1, -0.2));
        assert_abs_diff_eq!(pos.y, 0.99, epsilon = 1e-12);
    }

    #[test]
    fn crossing_the_outlet_absorbs() {
        let (pos, vel, event) = bounds().resolve(DVec2::new(1.99, 0.5), DVec2::new(2.01, 0.52), DVec2::new(3.0, 1.0));
        assert_eq!(event, BoundaryEvent::Absorbed);
        assert_eq!(vel, DVec2::ZERO);
        assert_eq!(pos, DVec2::new(2.01, 0.52));
    }

    #[test]
    fn wall_top_and_side_faces() {
        let b = bounds();
        let (pos, vel, event) = b.resolve(DVec2::new(1.0, 0.32), DVec2::new(1.0, 0.28), DVec2::new(0.5, -2.0));
        assert_eq!(event, BoundaryEvent::WallTop);
        assert_eq!(vel, DVec2::new(0.5, 2.0));
        assert_abs_diff_eq!(pos.y, 0.32, epsilon = 1e-12);

        let (pos, vel, event) = b.resolve(DVec2::new(0.78, 0.1), DVec2::new(0.82, 0.1), DVec2::new(2.0, 0.1));
        assert_eq!(event, BoundaryEvent::WallSide);
        assert_eq!(vel, DVec2::new(-2.0, 0.1));
        assert_abs_diff_eq!(pos.x, 0.78, epsilon = 1e-12);

        let (pos, vel, _) = b.resolve(DVec2::new(1.22, 0.2), DVec2::new(1.18, 0.2), DVec2::new(-1.0, 0.0));
        assert_eq!(vel, DVec2::new(1.0, 0.0));
        assert_abs_diff_eq!(pos.x, 1.22, epsilon = 1e-12);
    }

    #[test]
    fn particle_resting_on_wall_top_bounces_off_it() {
        let b = bounds();
        let (pos, vel, event) = b.resolve(DVec2::new(1.0, 0.3), DVec2::new(1.0, 0.25), DVec2::new(0.0, -1.0));
        assert_eq!(event, BoundaryEvent::WallTop);
        assert_eq!(vel, DVec2::new(0.0, 1.0));
        assert_abs_diff_eq!(pos.y, 0.35, epsilon = 1e-12);
        assert!(!b.wall.unwrap().contains(pos));
    }

    #[test]
    fn engine_push_reflects_off_both_wall_faces() {
        let wall = WallSpec { x_wall: 0.8, w_wall: 0.4, h_wall: 0.3 };
        let grid = test_grid(Some(wall));
        let (field, _) = ElectricField::solve(&grid, &SolverConfig::default()).unwrap();
        let mut engine = ParticleEngine::new(unit_species(), Integrator::Leapfrog, &grid).unwrap();
        // heading into the left face, and falling onto the top face
        engine.add_particle(DVec2::new(0.62, 0.1), DVec2::new(1.0, 0.0));
        engine.add_particle(DVec2::new(1.0, 0.52), DVec2::new(0.0, -1.0));

        for _ in 0..8 {
            engine.push(&field, 0.05).unwrap();
            for p in engine.particles() {
                assert!(!wall.contains(p.pos()) || p.pos().x == wall.x_wall || p.pos().y == wall.h_wall);
            }
        }
        assert_eq!(engine.get_velocity(0).unwrap(), DVec2::new(-1.0, 0.0));
        assert!(engine.get_position(0).unwrap().x < wall.x_wall);
        assert_eq!(engine.get_velocity(1).unwrap(), DVec2::new(0.0, 1.0));
        assert!(engine.get_position(1).unwrap().y > wall.h_wall);
        assert_eq!(engine.num_absorbed(), 0);
    }

    #[test]
    fn inlet_reflects_backward_particles() {
        let (pos, vel, event) = bounds().resolve(DVec2::new(0.01, 0.5), DVec2::new(-0.01, 0.5), DVec2::new(-1.0, 0.0));
        assert_eq!(event, BoundaryEvent::ReflectedInlet);
        assert_eq!(vel, DVec2::new(1.0, 0.0));
        assert_abs_diff_eq!(pos.x, 0.01, epsilon = 1e-15);
    }

    #[test]
    fn indexed_access_is_range_checked() {
        let grid = test_grid(None);
        let mut engine = ParticleEngine::new(unit_species(), Integrator::Euler, &grid).unwrap();
        engine.load_inlet(3, 1.0, Loading::InletUniform);
        assert_abs_diff_eq!(engine.get_position(1).unwrap().y, 0.5, epsilon = 1e-15);
        assert_eq!(engine.get_velocity(2).unwrap(), DVec2::new(1.0, 0.0));
        assert_eq!(engine.get_position(3), Err(PicError::OutOfRange { index: 3, len: 3 }));
        assert!(matches!(engine.get_velocity(10), Err(PicError::OutOfRange { .. })));
    }

    #[test]
    fn random_loading_is_seeded() {
        let grid = test_grid(None);
        let mut a = ParticleEngine::new(unit_species(), Integrator::Euler, &grid).unwrap();
        let mut b = a.clone();
        a.load_inlet(20, 5.0, Loading::InletRandom { seed: 7 });
        b.load_inlet(20, 5.0, Loading::InletRandom { seed: 7 });
        assert_eq!(a.positions(), b.positions());
        for (p, v) in a.positions().iter().zip(a.velocities()) {
            assert_eq!(p.x, 0.0);
            assert!(p.y >= 0.0 && p.y <= 1.0);
            assert!(v.x >= 0.0 && v.x < 5.0 && v.y == 0.0);
        }
    }

    #[test]
    fn absorbed_particles_stay_frozen() {
        let grid = test_grid(None);
        let (field, _) = ElectricField::solve(&grid, &SolverConfig::default()).unwrap();
        let mut engine = ParticleEngine::new(unit_species(), Integrator::Leapfrog, &grid).unwrap();
        engine.add_particle(DVec2::new(1.95, 0.5), DVec2::new(1.0, 0.0));
        engine.push(&field, 0.1).unwrap();
        assert!(engine.all_absorbed());
        let frozen = engine.get_position(0).unwrap();
        assert!(frozen.x >= 2.0);
        for _ in 0..5 {
            engine.push(&field, 0.1).unwrap();
            assert_eq!(engine.get_position(0).unwrap(), frozen);
            assert_eq!(engine.get_velocity(0).unwrap(), DVec2::ZERO);
        }
        assert_eq!(engine.step_count(), 6);
    }

    #[test]
    fn parallel_push_matches_serial() {
        let grid = Grid::build(GridSpec {
            h: 0.1,
            length: 2.0,
            height: 1.0,
            wall: Some(WallSpec { x_wall: 0.8, w_wall: 0.4, h_wall: 0.3 }),
            v_in: 10.0,
            v_out: -2.0,
            v_wall: 8.0,
        })
        .unwrap();
        let (field, _) = ElectricField::solve(&grid, &SolverConfig::default()).unwrap();
        let mut serial = ParticleEngine::new(unit_species(), Integrator::Rk4, &grid).unwrap();
        serial.load_inlet(16, 0.5, Loading::InletRandom { seed: 3 });
        let mut parallel = serial.clone().with_parallel(true);
        for _ in 0..40 {
            serial.push(&field, 0.01).unwrap();
            parallel.push(&field, 0.01).unwrap();
        }
        assert_eq!(serial.positions(), parallel.positions());
        assert_eq!(serial.velocities(), parallel.velocities());
    }

    #[test]
    fn non_finite_state_is_a_divergence() {
        let grid = test_grid(None);
        let (field, _) = ElectricField::solve(&grid, &SolverConfig::default()).unwrap();
        let mut engine = ParticleEngine::new(unit_species(), Integrator::Euler, &grid).unwrap();
        engine.add_particle(DVec2::new(0.5, 0.5), DVec2::new(f64::INFINITY, 0.0));
        assert_eq!(engine.push(&field, 0.1), Err(PicError::Divergence { index: 0, step: 0 }));
    }

    #[test]
    fn rejects_bad_species_and_time_step() {
        let grid = test_grid(None);
        let bad = Species { charge: 1.0, mass: 0.0 };
        assert!(matches!(ParticleEngine::new(bad, Integrator::Euler, &grid), Err(PicError::InvalidConfig(_))));

        let (field, _) = ElectricField::solve(&grid, &SolverConfig::default()).unwrap();
        let mut engine = ParticleEngine::new(unit_species(), Integrator::Euler, &grid).unwrap();
        assert!(engine.push(&field, 0.0).is_err());
    }

    #[test]
    fn energy_sums_kinetic_and_potential() {
        let grid = Grid::build(GridSpec {
            h: 0.1,
            length: 2.0,
            height: 1.0,
            wall: None,
            v_in: 4.0,
            v_out: 0.0,
            v_wall: 0.0,
        })
        .unwrap();
        let (field, _) = ElectricField::solve(&grid, &SolverConfig::default()).unwrap();
        let species = Species { charge: 2.0, mass: 3.0 };
        let mut engine = ParticleEngine::new(species, Integrator::Euler, &grid).unwrap();
        engine.add_particle(DVec2::new(1.0, 0.5), DVec2::new(1.0, 1.0));
        let e = engine.energy(&field).unwrap();
        assert_abs_diff_eq!(e.kinetic, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.potential, 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(e.total, 7.0, epsilon = 1e-9);
        assert_eq!(engine.momentum(), DVec2::new(3.0, 3.0));
        assert_eq!(engine.particle_energy(0, &field).unwrap(), e);
        assert!(engine.particle_energy(1, &field).is_err());
    }
}
