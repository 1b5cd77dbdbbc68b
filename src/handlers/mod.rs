pub mod diagnostics;
pub mod health;
pub mod notify;

pub use diagnostics::*;
pub use health::*;
pub use notify::*;
