pub mod annotation;
pub mod application;
pub mod change;
pub mod common;
pub mod reference;
pub mod validity;
pub mod version;

pub use annotation::*;
pub use application::*;
pub use change::*;
pub use common::*;
pub use reference::*;
pub use validity::*;
pub use version::*;
