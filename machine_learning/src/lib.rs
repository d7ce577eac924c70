pub mod arch;
pub mod error;
pub mod initialization;
pub mod optimization;
mod params;
mod test;

pub use error::{MlErr, Result};
pub use params::{ParamBlock, ParamStore};
