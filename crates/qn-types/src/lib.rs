pub mod config;
pub mod errors;
pub mod variable;

pub use config::*;
pub use errors::*;
pub use variable::*;
