pub mod change_detector;
pub mod fixer;
pub mod updater;
pub mod validity_checker;

pub use change_detector::*;
pub use fixer::*;
pub use updater::*;
pub use validity_checker::*;
