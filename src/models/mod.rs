pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;
pub mod note;
pub mod permission;
pub mod ready;
pub mod status;

pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use note::*;
pub use permission::*;
pub use ready::*;
pub use status::*;
