mod config;
mod constants;
mod driver;
mod errors;
mod topology;
mod transport;

pub use config::*;
pub use driver::*;
pub use errors::*;
pub use topology::*;
pub use transport::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
