pub mod integrator;
pub mod particles;

pub use integrator::AccelerationModel;
pub use integrator::Integrator;
pub use integrator::Magnetized;
pub use particles::Boundaries;
pub use particles::BoundaryEvent;
pub use particles::EnergyInfo;
pub use particles::FieldAcceleration;
pub use particles::Loading;
pub use particles::Particle;
pub use particles::ParticleEngine;
pub use particles::Species;
