mod interface;
#[cfg(test)]
pub(crate) mod mock;
mod random;
mod sequential;

pub use interface::*;
pub use random::*;
pub use sequential::*;
