//! Stateless particle pushers.
//!
//! Every pusher maps `(x, v)` to `(x', v')` over one step `dt`, reading
//! accelerations from an [`AccelerationModel`]. None of them knows about
//! species constants; the caller folds `q/m` into the model.

use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PicError, Result};

/// Position-dependent acceleration seen by a particle.
pub trait AccelerationModel {
    /// Electric acceleration `q E(x) / m`.
    fn acceleration(&self, pos: DVec2) -> Result<DVec2>;

    /// Gyration vector `q B(x) / m` (rad/s). Zero for an unmagnetized run.
    fn gyration(&self, _pos: DVec2) -> DVec3 {
        DVec3::ZERO
    }
}

impl<F> AccelerationModel for F
    where F: Fn(DVec2) -> Result<DVec2>
{
    fn acceleration(&self, pos: DVec2) -> Result<DVec2> {
        self(pos)
    }
}

/// Adds a uniform gyration vector to an electric acceleration model.
#[derive(Debug, Clone, Copy)]
pub struct Magnetized<A> {
    pub electric: A,
    pub gyration: DVec3,
}

impl<A: AccelerationModel> AccelerationModel for Magnetized<A> {
    fn acceleration(&self, pos: DVec2) -> Result<DVec2> {
        self.electric.acceleration(pos)
    }

    fn gyration(&self, _pos: DVec2) -> DVec3 {
        self.gyration
    }
}

/// Selector over the available pushers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrator {
    Euler,
    Rk4,
    #[default]
    Leapfrog,
    Verlet,
    Boris,
    #[serde(alias = "tajima")]
    TajimaImplicit,
    TajimaExplicit,
}

impl Integrator {
    pub const ALL: [Integrator; 7] = [
        Integrator::Euler,
        Integrator::Rk4,
        Integrator::Leapfrog,
        Integrator::Verlet,
        Integrator::Boris,
        Integrator::TajimaImplicit,
        Integrator::TajimaExplicit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Integrator::Euler => "euler",
            Integrator::Rk4 => "rk4",
            Integrator::Leapfrog => "leapfrog",
            Integrator::Verlet => "verlet",
            Integrator::Boris => "boris",
            Integrator::TajimaImplicit => "tajima_implicit",
            Integrator::TajimaExplicit => "tajima_explicit",
        }
    }

    /// True for the pushers that apply a magnetic rotation.
    pub fn is_magnetized(&self) -> bool {
        matches!(self, Integrator::Boris | Integrator::TajimaImplicit | Integrator::TajimaExplicit)
    }

    pub fn step<A>(&self, x: DVec2, v: DVec2, accel: &A, dt: f64) -> Result<(DVec2, DVec2)>
        where A: AccelerationModel + ?Sized
    {
        match self {
            Integrator::Euler => euler(x, v, accel, dt),
            Integrator::Rk4 => rk4(x, v, accel, dt),
            Integrator::Leapfrog => leapfrog(x, v, accel, dt, false),
            Integrator::Verlet => leapfrog(x, v, accel, dt, true),
            Integrator::Boris => boris(x, v, accel, dt),
            Integrator::TajimaImplicit => tajima_implicit(x, v, accel, dt),
            Integrator::TajimaExplicit => tajima_explicit(x, v, accel, dt),
        }
    }
}

impl fmt::Display for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Integrator {
    type Err = PicError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        if key == "tajima" {
            return Ok(Integrator::TajimaImplicit);
        }
        Integrator::ALL
            .into_iter()
            .find(|i| i.name() == key)
            .ok_or_else(|| PicError::InvalidConfig(format!("unknown integrator '{s}'")))
    }
}

/// Semi-implicit Euler: the position update uses the updated velocity.
pub fn euler<A>(x: DVec2, v: DVec2, a: &A, dt: f64) -> Result<(DVec2, DVec2)>
    where A: AccelerationModel + ?Sized
{
    let v_new = v + a.acceleration(x)? * dt;
    let x_new = x + v_new * dt;
    Ok((x_new, v_new))
}

/// Classical fourth-order Runge-Kutta on `(x' = v, v' = a(x))`.
pub fn rk4<A>(x: DVec2, v: DVec2, a: &A, dt: f64) -> Result<(DVec2, DVec2)>
    where A: AccelerationModel + ?Sized
{
    let k1_v = a.acceleration(x)?;
    let k1_x = v;

    let k2_v = a.acceleration(x + 0.5 * dt * k1_x)?;
    let k2_x = v + 0.5 * dt * k1_v;

    let k3_v = a.acceleration(x + 0.5 * dt * k2_x)?;
    let k3_x = v + 0.5 * dt * k2_v;

    let k4_v = a.acceleration(x + dt * k3_x)?;
    let k4_x = v + dt * k3_v;

    let x_new = x + (dt / 6.0) * (k1_x + 2.0 * k2_x + 2.0 * k3_x + k4_x);
    let v_new = v + (dt / 6.0) * (k1_v + 2.0 * k2_v + 2.0 * k3_v + k4_v);
    Ok((x_new, v_new))
}

/// Kick-drift-kick leapfrog, or velocity Verlet when `use_verlet` is set.
/// Both re-evaluate the acceleration at the new position.
pub fn leapfrog<A>(x: DVec2, v: DVec2, a: &A, dt: f64, use_verlet: bool) -> Result<(DVec2, DVec2)>
    where A: AccelerationModel + ?Sized
{
    let a0 = a.acceleration(x)?;
    if use_verlet {
        let x_new = x + v * dt + 0.5 * a0 * dt * dt;
        let v_new = v + 0.5 * (a0 + a.acceleration(x_new)?) * dt;
        Ok((x_new, v_new))
    } else {
        let v_half = v + 0.5 * a0 * dt;
        let x_new = x + v_half * dt;
        let v_new = v_half + 0.5 * a.acceleration(x_new)? * dt;
        Ok((x_new, v_new))
    }
}

/// Boris push with synchronized velocities: half electric kick at `x`,
/// magnetic rotation, drift, half electric kick at the new position.
/// Without a magnetic field this is exactly the kick-drift-kick leapfrog.
pub fn boris<A>(x: DVec2, v: DVec2, a: &A, dt: f64) -> Result<(DVec2, DVec2)>
    where A: AccelerationModel + ?Sized
{
    let v_minus = (v + a.acceleration(x)? * (0.5 * dt)).extend(0.0);

    let t = a.gyration(x) * (0.5 * dt);
    let s = 2.0 * t / (1.0 + t.dot(t));
    let v_prime = v_minus + v_minus.cross(t);
    let v_plus = (v_minus + v_prime.cross(s)).truncate();

    let x_new = x + v_plus * dt;
    let v_new = v_plus + a.acceleration(x_new)? * (0.5 * dt);
    Ok((x_new, v_new))
}

// Matrix S with S v = v x (w dt / 2).
fn rotation_generator(w: DVec3, dt: f64) -> DMat3 {
    let e = w * (0.5 * dt);
    DMat3::from_cols(
        DVec3::new(0.0, -e.z, e.y),
        DVec3::new(e.z, 0.0, -e.x),
        DVec3::new(-e.y, e.x, 0.0),
    )
}

fn tajima<A>(x: DVec2, v: DVec2, a: &A, dt: f64, implicit: bool) -> Result<(DVec2, DVec2)>
    where A: AccelerationModel + ?Sized
{
    let v_minus = (v + a.acceleration(x)? * (0.5 * dt)).extend(0.0);

    let r = rotation_generator(a.gyration(x), dt);
    let m_plus = DMat3::IDENTITY + r;
    let v_plus = if implicit {
        let m_minus = DMat3::IDENTITY - r;
        // det(I - S) = 1 + |w dt / 2|^2, never singular
        m_minus.inverse() * (m_plus * v_minus)
    } else {
        m_plus * v_minus
    };
    let v_plus = v_plus.truncate();

    let x_new = x + v_plus * dt;
    let v_new = v_plus + a.acceleration(x_new)? * (0.5 * dt);
    Ok((x_new, v_new))
}

/// Tajima push with the rotation solved through `(I - S)^-1 (I + S)`.
pub fn tajima_implicit<A>(x: DVec2, v: DVec2, a: &A, dt: f64) -> Result<(DVec2, DVec2)>
    where A: AccelerationModel + ?Sized
{
    tajima(x, v, a, dt, true)
}

/// Tajima push with the rotation applied directly as `(I + S)`.
pub fn tajima_explicit<A>(x: DVec2, v: DVec2, a: &A, dt: f64) -> Result<(DVec2, DVec2)>
    where A: AccelerationModel + ?Sized
{
    tajima(x, v, a, dt, false)
}
