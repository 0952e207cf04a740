pub mod goal;
pub mod timeseries;

pub use goal::*;
pub use timeseries::*;
