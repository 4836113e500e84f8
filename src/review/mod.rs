mod cluster;
mod driver;
mod err;
mod plan;
pub(crate) mod test_utils;

pub use cluster::*;
pub use driver::*;
pub use err::*;
pub use plan::*;
