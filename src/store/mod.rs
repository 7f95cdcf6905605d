pub mod codec;
pub mod filesystem;
pub mod traits;

pub use codec::*;
pub use filesystem::*;
pub use traits::*;
