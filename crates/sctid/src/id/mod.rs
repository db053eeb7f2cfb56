mod classify;
mod partition;
mod sctid;
mod verhoeff;

pub use classify::*;
pub use partition::*;
pub use sctid::*;
