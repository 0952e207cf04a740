pub mod backends;
pub mod builder;
pub mod checks;
pub mod constraints;
pub mod expander;
pub mod observer;
pub mod problem;
pub mod results;
pub mod scheduler;
pub mod smoothing;

pub use backends::*;
pub use builder::*;
pub use checks::*;
pub use constraints::*;
pub use expander::*;
pub use observer::*;
pub use problem::*;
pub use results::*;
pub use scheduler::*;
pub use smoothing::*;
