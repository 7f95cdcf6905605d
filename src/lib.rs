pub mod config;
pub mod error;
pub mod logic;
pub mod manager;
pub mod model;
pub mod store;

pub use error::IdpaError;

pub use logic::{AnnotationFixer, AnnotationValidityChecker, ApplicationChangeDetector, ApplicationUpdater};

pub use manager::{AnnotationStorageManager, ApplicationStorageManager};

// Export all model types
pub use model::*;

pub use store::{DocumentCodec, DocumentFormat, FileSystemStorage, IdpaEntry, IdpaStorage, IdpaStorageListener};
