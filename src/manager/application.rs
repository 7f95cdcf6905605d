use anyhow::Result;
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::logic::{ApplicationChangeDetector, ApplicationUpdater};
use crate::model::{Application, ApplicationChangeReport, ApplicationChangeType, VersionOrTimestamp};
use crate::store::IdpaStorage;

/// Save workflow for application models.
///
/// A submission is merged into the version timeline rather than written blindly:
/// unchanged models are dropped, models equal to their next stored successor
/// relabel that successor, and ignored change types never overwrite stored state.
pub struct ApplicationStorageManager<S: IdpaStorage> {
    storage: Arc<S>,
}

impl<S: IdpaStorage> ApplicationStorageManager<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Latest application, or the one valid at `version`
    pub fn read(&self, tag: &str, version: Option<&VersionOrTimestamp>) -> Result<Option<Application>> {
        match version {
            Some(version) => self.storage.read_application_at(tag, version),
            None => self.storage.read_latest(tag),
        }
    }

    pub fn save_or_update(
        &self,
        tag: &str,
        mut application: Application,
        ignored_change_types: &BTreeSet<ApplicationChangeType>,
    ) -> Result<ApplicationChangeReport> {
        application.tag = tag.to_string();

        let lock = self.storage.tag_lock(tag);
        let _guard = lock.lock();

        let Some(before) = self.storage.read_application_at(tag, &application.version)? else {
            info!("First application of {} at {}", tag, application.version);
            self.storage.save_application(&application)?;
            return Ok(ApplicationChangeReport::all_of(application));
        };

        let detector = ApplicationChangeDetector::ignoring(&application, ignored_change_types.iter().copied());
        let report = detector.compare_to(&before)?;

        if !report.has_changes() {
            debug!(
                "Application {} at {} has no changes against {}",
                tag, application.version, before.version
            );
            return Ok(ApplicationChangeReport {
                updated_application: before,
                ..report
            });
        }

        if let Some(after) = self.storage.read_oldest_after(tag, &application.version)? {
            if !detector.compare_to(&after)?.has_changes() {
                info!(
                    "Application {} at {} equals the one at {}; relabeling instead of storing",
                    tag, application.version, after.version
                );
                self.storage
                    .update_application_change(tag, &after.version, &application.version)?;

                let relabeled = Application {
                    version: application.version.clone(),
                    ..after
                };
                return Ok(ApplicationChangeReport {
                    updated_application: relabeled,
                    ..report
                });
            }
        }

        let merged = ApplicationUpdater::update(&before, &application, &report)?;
        self.storage.save_application(&merged)?;
        info!(
            "Stored application {} at {} with {} change(s) ({} ignored)",
            tag,
            merged.version,
            report.applied_changes.len(),
            report.ignored_changes.len()
        );

        Ok(ApplicationChangeReport {
            updated_application: merged,
            ..report
        })
    }

    /// Changes from the application valid at `since` to the latest one
    pub fn changes_since(&self, tag: &str, since: &VersionOrTimestamp) -> Result<Option<ApplicationChangeReport>> {
        let Some(latest) = self.storage.read_latest(tag)? else {
            return Ok(None);
        };

        match self.storage.read_application_at(tag, since)? {
            Some(base) => Ok(Some(ApplicationChangeDetector::new(&latest).compare_to(&base)?)),
            None => Ok(Some(ApplicationChangeReport::all_of(latest))),
        }
    }
}
