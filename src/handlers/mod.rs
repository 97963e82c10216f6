pub mod health;
pub mod status;
pub mod diagnostics;

pub use health::*;
pub use status::*;
pub use diagnostics::*;
