pub mod diagnostic_output;

pub use diagnostic_output::CsvLogger;
pub use diagnostic_output::DiagnosticOutput;
pub use diagnostic_output::TimeInfo;
