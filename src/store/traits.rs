use anyhow::Result;
use parking_lot::ReentrantMutex;
use std::sync::{Arc, Weak};

use crate::model::{Application, ApplicationAnnotation, VersionOrTimestamp};

/// Callbacks invoked synchronously after a successful write, on the writer's thread
pub trait IdpaStorageListener: Send + Sync {
    fn on_application_changed(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()>;
    fn on_annotation_changed(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()>;
}

/// One version slot of a tag as seen during iteration
#[derive(Debug, Clone, PartialEq)]
pub struct IdpaEntry {
    pub version: VersionOrTimestamp,
    /// Application valid at this version: the slot's own or the nearest earlier one
    pub application: Option<Application>,
    /// The slot's own annotation
    pub annotation: Option<ApplicationAnnotation>,
    pub broken: bool,
}

impl IdpaEntry {
    pub fn has_own_application(&self) -> bool {
        self.application
            .as_ref()
            .is_some_and(|a| a.version == self.version)
    }
}

/// Version-indexed persistence of application/annotation pairs per tag.
///
/// A slot `(tag, version)` may hold an application, an annotation, both, or only
/// a broken marker. Lookups "at" a version chain back to the nearest earlier slot
/// holding the requested document.
pub trait IdpaStorage: Send + Sync {
    /// Re-entrant lock serializing writers of one tag. Managers hold it across
    /// read-decide-write; listener callbacks on the same thread may take it again.
    fn tag_lock(&self, tag: &str) -> Arc<ReentrantMutex<()>>;

    /// All tags with at least one slot
    fn tags(&self) -> Result<Vec<String>>;
    /// Slot versions of a tag, newest first
    fn versions(&self, tag: &str) -> Result<Vec<VersionOrTimestamp>>;

    fn has_application(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool>;
    fn has_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool>;

    /// Stores the application under its own version and notifies listeners
    fn save_application(&self, application: &Application) -> Result<()>;
    /// Stores the annotation under its version and notifies listeners.
    /// Fails with `IdpaError::MissingAnnotationVersion` when it has none.
    fn save_annotation(&self, tag: &str, annotation: &ApplicationAnnotation) -> Result<()>;

    fn read_application(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<Application>>;
    fn read_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<ApplicationAnnotation>>;

    /// Relabel the application stored at `old_version` (and its annotation, if
    /// the target slot has none) to `new_version`, then drop the old slot
    fn update_application_change(
        &self,
        tag: &str,
        old_version: &VersionOrTimestamp,
        new_version: &VersionOrTimestamp,
    ) -> Result<()>;

    fn mark_as_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()>;
    fn unmark_as_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()>;
    /// Marker of exactly this slot
    fn is_marked_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool>;

    /// Repair proposal for a broken slot; never read as the slot's annotation
    fn save_fixed_annotation(&self, tag: &str, annotation: &ApplicationAnnotation) -> Result<()>;
    fn read_fixed_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<ApplicationAnnotation>>;
    fn delete_fixed_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()>;

    fn register_listener(&self, listener: Weak<dyn IdpaStorageListener>);

    fn read_latest(&self, tag: &str) -> Result<Option<Application>> {
        self.read_application_at(tag, &VersionOrTimestamp::MAX)
    }

    /// Newest application strictly before `version`
    fn read_latest_before(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<Application>> {
        for candidate in self.versions(tag)? {
            if &candidate < version && self.has_application(tag, &candidate)? {
                return self.read_application(tag, &candidate);
            }
        }
        Ok(None)
    }

    /// Application valid at `version`: stored at it or the newest before it
    fn read_application_at(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<Application>> {
        for candidate in self.versions(tag)? {
            if &candidate <= version && self.has_application(tag, &candidate)? {
                return self.read_application(tag, &candidate);
            }
        }
        Ok(None)
    }

    /// Oldest application strictly after `version`
    fn read_oldest_after(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<Application>> {
        for candidate in self.versions(tag)?.into_iter().rev() {
            if &candidate > version && self.has_application(tag, &candidate)? {
                return self.read_application(tag, &candidate);
            }
        }
        Ok(None)
    }

    /// Annotation valid at `version`: stored at it or the newest before it
    fn read_annotation_at(
        &self,
        tag: &str,
        version: &VersionOrTimestamp,
    ) -> Result<Option<ApplicationAnnotation>> {
        for candidate in self.versions(tag)? {
            if &candidate <= version && self.has_annotation(tag, &candidate)? {
                return self.read_annotation(tag, &candidate);
            }
        }
        Ok(None)
    }

    /// Broken state at `version`, taken from the nearest slot at or before it
    fn is_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool> {
        match self.versions(tag)?.into_iter().find(|v| v <= version) {
            Some(slot) => self.is_marked_broken(tag, &slot),
            None => Ok(false),
        }
    }

    /// Every slot of the tag, newest first
    fn iterate(&self, tag: &str) -> Result<Vec<IdpaEntry>> {
        let mut entries = Vec::new();
        let mut application: Option<Application> = None;

        for version in self.versions(tag)?.into_iter().rev() {
            if let Some(own) = self.read_application(tag, &version)? {
                application = Some(own);
            }
            entries.push(IdpaEntry {
                annotation: self.read_annotation(tag, &version)?,
                broken: self.is_marked_broken(tag, &version)?,
                application: application.clone(),
                version,
            });
        }

        entries.reverse();
        Ok(entries)
    }
}
