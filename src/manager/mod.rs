pub mod annotation;
pub mod application;

pub use annotation::*;
pub use application::*;
