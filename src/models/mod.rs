pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;
pub mod notify;
pub mod presence;
pub mod ready;

pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use notify::*;
pub use presence::*;
pub use ready::*;
