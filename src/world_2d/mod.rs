pub mod field_solver;
pub mod grid;
pub mod sparse;
pub mod two_d_field;

pub use field_solver::DomainPolicy;
pub use field_solver::ElectricField;
pub use field_solver::Interpolant;
pub use grid::Grid;
pub use grid::GridSpec;
pub use grid::NodeClass;
pub use grid::SingleDimSpec;
pub use grid::WallSpec;
pub use sparse::SolverConfig;
pub use sparse::SolverMethod;
pub use two_d_field::TwoDField;
