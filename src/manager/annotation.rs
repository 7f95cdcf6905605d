use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::error::IdpaError;
use crate::logic::{AnnotationFixer, AnnotationValidityChecker, ApplicationChangeDetector};
use crate::model::{
    Application, ApplicationAnnotation, AnnotationValidityReport, VersionOrTimestamp,
};
use crate::store::{IdpaEntry, IdpaStorage, IdpaStorageListener};

/// Which stored document bounds a broken-marker recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AffectedRange {
    /// Up to the next slot with its own application
    Application,
    /// Up to the next slot with its own annotation
    Annotation,
}

/// Save workflow for annotations and keeper of the per-version broken markers.
///
/// Registered as storage listener on construction: every stored application or
/// annotation triggers a recompute of the markers of the slots it affects.
pub struct AnnotationStorageManager<S: IdpaStorage> {
    storage: Arc<S>,
}

impl<S: IdpaStorage + 'static> AnnotationStorageManager<S> {
    pub fn new(storage: Arc<S>) -> Arc<Self> {
        let manager = Arc::new(Self {
            storage: storage.clone(),
        });

        let listener: Arc<dyn IdpaStorageListener> = manager.clone();
        storage.register_listener(Arc::downgrade(&listener));
        manager
    }
}

impl<S: IdpaStorage> AnnotationStorageManager<S> {
    /// Annotation valid at `version`
    pub fn read(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<ApplicationAnnotation>> {
        self.storage.read_annotation_at(tag, version)
    }

    /// Validate and store an annotation. A breaking annotation is not stored;
    /// the returned report says why.
    pub fn save_or_update(&self, tag: &str, mut annotation: ApplicationAnnotation) -> Result<AnnotationValidityReport> {
        annotation.tag = tag.to_string();
        let version = annotation
            .version
            .clone()
            .ok_or_else(|| IdpaError::MissingAnnotationVersion { tag: tag.to_string() })?;

        let lock = self.storage.tag_lock(tag);
        let _guard = lock.lock();

        let application = self
            .storage
            .read_application_at(tag, &version)?
            .ok_or_else(|| IdpaError::NoApplication {
                tag: tag.to_string(),
                version: version.clone(),
            })?;

        let mut checker = AnnotationValidityChecker::new(&application);
        checker.check_annotation(&annotation);
        let report = checker.report();

        if report.is_breaking() {
            warn!(
                "Rejected annotation {} at {}: {} element(s) with dangling references",
                tag,
                version,
                report.breaking_elements().count()
            );
            return Ok(report);
        }

        self.storage.save_annotation(tag, &annotation)?;
        Ok(report)
    }

    pub fn is_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool> {
        self.storage.is_broken(tag, version)
    }

    /// Broken slots governed by the application valid at `application_version`, oldest first
    pub fn broken_versions(
        &self,
        tag: &str,
        application_version: &VersionOrTimestamp,
    ) -> Result<Vec<VersionOrTimestamp>> {
        let Some(application) = self.storage.read_application_at(tag, application_version)? else {
            return Ok(Vec::new());
        };
        let next = self
            .storage
            .read_oldest_after(tag, &application.version)?
            .map(|a| a.version);

        let mut broken: Vec<VersionOrTimestamp> = self
            .storage
            .iterate(tag)?
            .into_iter()
            .filter(|e| e.broken && e.version >= application.version)
            .filter(|e| next.as_ref().map_or(true, |next| &e.version < next))
            .map(|e| e.version)
            .collect();
        broken.reverse();
        Ok(broken)
    }

    /// Automatic repair proposed for a broken slot, with a report carrying the
    /// findings the repair was derived from
    pub fn read_fixed(
        &self,
        tag: &str,
        version: &VersionOrTimestamp,
    ) -> Result<Option<(ApplicationAnnotation, AnnotationValidityReport)>> {
        let Some(fixed) = self.storage.read_fixed_annotation(tag, version)? else {
            return Ok(None);
        };
        let Some(application) = self.storage.read_application_at(tag, version)? else {
            return Ok(None);
        };

        let before = match self.storage.read_annotation_at(tag, version)? {
            Some(original) => self.check(tag, &application, &original)?.violations,
            None => Default::default(),
        };

        let mut checker = AnnotationValidityChecker::new(&application);
        checker.check_annotation(&fixed);
        let report = checker.report().with_violations_before_fix(before);

        Ok(Some((fixed, report)))
    }

    /// Full check of an annotation against the application of a slot, including
    /// the changes since the application the annotation was written against
    fn check(
        &self,
        tag: &str,
        application: &Application,
        annotation: &ApplicationAnnotation,
    ) -> Result<AnnotationValidityReport> {
        let mut checker = AnnotationValidityChecker::new(application);

        if let Some(annotated_at) = &annotation.version {
            if let Some(base) = self.storage.read_application_at(tag, annotated_at)? {
                if base.version != application.version {
                    let changes = ApplicationChangeDetector::new(application).compare_to(&base)?;
                    checker.check_changes(annotation, &changes);
                }
            }
        }

        checker.check_annotation(annotation);
        Ok(checker.report())
    }

    /// Recompute the broken markers of the slots from `from` up to the next
    /// slot that starts a new range of the given kind
    fn recompute(&self, tag: &str, from: &VersionOrTimestamp, range: AffectedRange) -> Result<()> {
        let lock = self.storage.tag_lock(tag);
        let _guard = lock.lock();

        let mut effective_annotation: Option<ApplicationAnnotation> = None;

        // Oldest first, so the effective annotation can be carried forward
        for entry in self.storage.iterate(tag)?.into_iter().rev() {
            let starts_new_range = match range {
                AffectedRange::Application => entry.has_own_application(),
                AffectedRange::Annotation => entry.annotation.is_some(),
            };
            if &entry.version > from && starts_new_range {
                break;
            }

            if let Some(own) = &entry.annotation {
                effective_annotation = Some(own.clone());
            }
            if &entry.version < from {
                continue;
            }

            self.recompute_slot(tag, &entry, effective_annotation.as_ref())?;
        }

        Ok(())
    }

    fn recompute_slot(
        &self,
        tag: &str,
        entry: &IdpaEntry,
        annotation: Option<&ApplicationAnnotation>,
    ) -> Result<()> {
        let (Some(application), Some(annotation)) = (entry.application.as_ref(), annotation) else {
            self.storage.unmark_as_broken(tag, &entry.version)?;
            return self.storage.delete_fixed_annotation(tag, &entry.version);
        };

        let report = self.check(tag, application, annotation)?;
        if !report.is_breaking() {
            debug!("Annotation {} is valid at {}", tag, entry.version);
            self.storage.unmark_as_broken(tag, &entry.version)?;
            return self.storage.delete_fixed_annotation(tag, &entry.version);
        }

        self.storage.mark_as_broken(tag, &entry.version)?;
        self.repair(tag, &entry.version, application, annotation, &report)
    }

    /// One repair pass. A result that is still breaking is discarded together
    /// with any earlier proposal, leaving the slot for manual correction.
    fn repair(
        &self,
        tag: &str,
        version: &VersionOrTimestamp,
        application: &Application,
        annotation: &ApplicationAnnotation,
        report: &AnnotationValidityReport,
    ) -> Result<()> {
        let fixed = AnnotationFixer::fix(annotation, report).relabeled(version.clone());

        let mut checker = AnnotationValidityChecker::new(application);
        checker.check_annotation(&fixed);

        if checker.report().is_breaking() {
            warn!(
                "Annotation {} at {} cannot be repaired automatically; manual correction required",
                tag, version
            );
            return self.storage.delete_fixed_annotation(tag, version);
        }

        self.storage.save_fixed_annotation(tag, &fixed)?;
        info!("Stored repair proposal for annotation {} at {}", tag, version);
        Ok(())
    }
}

impl<S: IdpaStorage> IdpaStorageListener for AnnotationStorageManager<S> {
    fn on_application_changed(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        self.recompute(tag, version, AffectedRange::Application)
    }

    fn on_annotation_changed(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        self.recompute(tag, version, AffectedRange::Annotation)
    }
}
