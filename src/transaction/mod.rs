//! Transaction data model - outputs, inputs, kernels and aggregate bodies

mod body;
mod builder;
mod features;
mod input;
mod kernel;
mod output;
#[allow(clippy::module_inception)]
mod transaction;

pub use body::*;
pub use builder::*;
pub use features::*;
pub use input::*;
pub use kernel::*;
pub use output::*;
pub use transaction::*;
