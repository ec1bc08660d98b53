
pub const QE: f64    = 1.602176565e-19; // C, electron charge
pub const ME: f64    = 9.10938215e-31;  // kg electron mass
pub const AMU: f64   = 1.660538921e-27; // kg, atomic mass unit
pub const XE_AMU: f64 = 131.293;        // xenon atomic mass in AMU
pub const M_XE: f64  = XE_AMU * AMU;    // kg, singly ionized xenon (electron mass neglected)
