use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use log::{debug, info, warn};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::error::IdpaError;
use crate::model::{Application, ApplicationAnnotation, VersionOrTimestamp};
use crate::store::codec::DocumentCodec;
use crate::store::traits::{IdpaStorage, IdpaStorageListener};

const APPLICATION_FILE: &str = "application";
const ANNOTATION_FILE: &str = "annotation";
const FIXED_ANNOTATION_FILE: &str = "annotation-fixed";
const BROKEN_MARKER: &str = "broken.txt";

/// Storage laid out as `root/{tag}/{version}/{application,annotation}.{ext}`
/// with `broken.txt` marking a broken slot by its presence
pub struct FileSystemStorage {
    root: PathBuf,
    codec: DocumentCodec,
    locks: Mutex<HashMap<String, Arc<ReentrantMutex<()>>>>,
    listeners: RwLock<Vec<Weak<dyn IdpaStorageListener>>>,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>, codec: DocumentCodec) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root {}", root.display()))?;
        info!("IDPA storage at {} ({:?})", root.display(), codec.format());

        Ok(Self {
            root,
            codec,
            locks: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tag_dir(&self, tag: &str) -> Result<PathBuf> {
        let valid = !tag.is_empty()
            && tag != "."
            && tag != ".."
            && !tag.contains(|c: char| c == '/' || c == '\\');
        if !valid {
            return Err(IdpaError::InvalidTag(tag.to_string()).into());
        }
        Ok(self.root.join(tag))
    }

    fn slot_dir(&self, tag: &str, version: &VersionOrTimestamp) -> Result<PathBuf> {
        if version.is_max() {
            return Err(anyhow!("The MAX version sentinel cannot be stored"));
        }
        let name = version.to_string();
        let mut components = Path::new(&name).components();
        let single = matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
        if !single || name.contains(|c: char| c == '/' || c == '\\') {
            return Err(IdpaError::InvalidVersion(name).into());
        }
        Ok(self.tag_dir(tag)?.join(name))
    }

    fn document_path(&self, tag: &str, version: &VersionOrTimestamp, name: &str) -> Result<PathBuf> {
        Ok(self
            .slot_dir(tag, version)?
            .join(format!("{}.{}", name, self.codec.extension())))
    }

    fn write_document<T: Serialize>(&self, path: &Path, document: &T) -> Result<()> {
        Self::write_raw(path, &self.codec.encode(document)?)
    }

    fn write_raw(path: &Path, raw: &str) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        // Write-then-rename so readers never see a half-written document
        let staging = path.with_extension("tmp");
        fs::write(&staging, raw).with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, path).with_context(|| format!("Failed to move {} into place", path.display()))?;

        debug!("Wrote {}", path.display());
        Ok(())
    }

    fn read_raw(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Put back what a document path held before a write
    fn restore(&self, tag: &str, version: &VersionOrTimestamp, path: &Path, previous: Option<String>) -> Result<()> {
        match previous {
            Some(raw) => Self::write_raw(path, &raw),
            None => {
                Self::remove_file(path)?;
                // Markers of a slot without documents belong to the rolled back write
                if !self.has_application(tag, version)? && !self.has_annotation(tag, version)? {
                    Self::remove_file(&self.slot_dir(tag, version)?.join(BROKEN_MARKER))?;
                    Self::remove_file(&self.document_path(tag, version, FIXED_ANNOTATION_FILE)?)?;
                }
                self.remove_slot_if_empty(tag, version)
            }
        }
    }

    fn read_document<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let Some(raw) = Self::read_raw(path)? else {
            return Ok(None);
        };
        let document = self
            .codec
            .decode(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(document))
    }

    fn remove_file(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    /// Drop the slot directory once nothing is left in it
    fn remove_slot_if_empty(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        let dir = self.slot_dir(tag, version)?;
        let is_empty = match fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };

        if is_empty {
            fs::remove_dir(&dir).with_context(|| format!("Failed to delete {}", dir.display()))?;
            debug!("Removed empty slot {}", dir.display());
        }
        Ok(())
    }

    fn live_listeners(&self) -> Vec<Arc<dyn IdpaStorageListener>> {
        self.listeners.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// Every listener is called even after one fails; the first failure is returned
    fn notify(&self, call: impl Fn(&dyn IdpaStorageListener) -> Result<()>) -> Result<()> {
        let mut first_error = None;
        for listener in self.live_listeners() {
            if let Err(e) = call(listener.as_ref()) {
                warn!("Storage listener failed: {:#}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn notify_application_changed(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        self.notify(|l| l.on_application_changed(tag, version))
    }

    fn notify_annotation_changed(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        self.notify(|l| l.on_annotation_changed(tag, version))
    }

    /// Listeners see the restored state again; their failures are only logged here
    fn renotify_after_rollback(&self, call: impl Fn(&dyn IdpaStorageListener) -> Result<()>) {
        if self.notify(call).is_err() {
            warn!("Derived state may be stale until the next successful write");
        }
    }

    /// Undo a relabel: the application (and a moved annotation) go back to
    /// `old_version`, and whatever `new_version` held before is restored
    fn relabel_back(
        &self,
        tag: &str,
        old_version: &VersionOrTimestamp,
        new_version: &VersionOrTimestamp,
        previous_application: Option<String>,
        moved_annotation: bool,
    ) -> Result<()> {
        let new_application = self.document_path(tag, new_version, APPLICATION_FILE)?;
        if let Some(mut application) = self.read_application(tag, new_version)? {
            application.version = old_version.clone();
            self.write_document(&self.document_path(tag, old_version, APPLICATION_FILE)?, &application)?;
        }

        if moved_annotation {
            if let Some(annotation) = self.read_annotation(tag, new_version)? {
                let annotation = annotation.relabeled(old_version.clone());
                self.write_document(&self.document_path(tag, old_version, ANNOTATION_FILE)?, &annotation)?;
                Self::remove_file(&self.document_path(tag, new_version, ANNOTATION_FILE)?)?;
            }
        }

        self.restore(tag, new_version, &new_application, previous_application)
    }

    fn annotation_version<'a>(tag: &str, annotation: &'a ApplicationAnnotation) -> Result<&'a VersionOrTimestamp> {
        annotation.version.as_ref().ok_or_else(|| {
            IdpaError::MissingAnnotationVersion {
                tag: tag.to_string(),
            }
            .into()
        })
    }
}

impl IdpaStorage for FileSystemStorage {
    fn tag_lock(&self, tag: &str) -> Arc<ReentrantMutex<()>> {
        self.locks
            .lock()
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone()
    }

    fn tags(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list {}", self.root.display()))?;

        let mut tags = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read storage root entry")?;
            if entry.file_type()?.is_dir() {
                tags.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tags.sort();
        Ok(tags)
    }

    fn versions(&self, tag: &str) -> Result<Vec<VersionOrTimestamp>> {
        let dir = self.tag_dir(tag)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to read entry of {}", dir.display()))?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match name.parse::<VersionOrTimestamp>() {
                Ok(version) => versions.push(version),
                Err(_) => warn!("Skipping {}/{}: not a version directory", tag, name),
            }
        }

        Ok(versions.into_iter().sorted_by(|a, b| b.cmp(a)).collect())
    }

    fn has_application(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool> {
        Ok(self.document_path(tag, version, APPLICATION_FILE)?.is_file())
    }

    fn has_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool> {
        Ok(self.document_path(tag, version, ANNOTATION_FILE)?.is_file())
    }

    fn save_application(&self, application: &Application) -> Result<()> {
        let tag = application.tag.as_str();
        let lock = self.tag_lock(tag);
        let _guard = lock.lock();

        let version = &application.version;
        let path = self.document_path(tag, version, APPLICATION_FILE)?;
        let previous = Self::read_raw(&path)?;
        self.write_document(&path, application)?;
        info!("Saved application {} at {}", tag, version);

        if let Err(e) = self.notify_application_changed(tag, version) {
            warn!("Rolling back application {} at {}", tag, version);
            self.restore(tag, version, &path, previous)?;
            self.renotify_after_rollback(|l| l.on_application_changed(tag, version));
            return Err(e);
        }
        Ok(())
    }

    fn save_annotation(&self, tag: &str, annotation: &ApplicationAnnotation) -> Result<()> {
        let version = Self::annotation_version(tag, annotation)?;
        let lock = self.tag_lock(tag);
        let _guard = lock.lock();

        let path = self.document_path(tag, version, ANNOTATION_FILE)?;
        let previous = Self::read_raw(&path)?;
        self.write_document(&path, annotation)?;
        info!("Saved annotation {} at {}", tag, version);

        if let Err(e) = self.notify_annotation_changed(tag, version) {
            warn!("Rolling back annotation {} at {}", tag, version);
            self.restore(tag, version, &path, previous)?;
            self.renotify_after_rollback(|l| l.on_annotation_changed(tag, version));
            return Err(e);
        }
        Ok(())
    }

    fn read_application(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<Application>> {
        self.read_document(&self.document_path(tag, version, APPLICATION_FILE)?)
    }

    fn read_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<ApplicationAnnotation>> {
        self.read_document(&self.document_path(tag, version, ANNOTATION_FILE)?)
    }

    fn update_application_change(
        &self,
        tag: &str,
        old_version: &VersionOrTimestamp,
        new_version: &VersionOrTimestamp,
    ) -> Result<()> {
        let lock = self.tag_lock(tag);
        let _guard = lock.lock();

        let mut application = self
            .read_application(tag, old_version)?
            .ok_or_else(|| anyhow!("No application of {} stored at {}", tag, old_version))?;
        application.version = new_version.clone();
        let new_application = self.document_path(tag, new_version, APPLICATION_FILE)?;
        let previous_application = Self::read_raw(&new_application)?;
        self.write_document(&new_application, &application)?;

        // An annotation already submitted for the new slot wins over the moved one
        let mut moved_annotation = false;
        if !self.has_annotation(tag, new_version)? {
            if let Some(annotation) = self.read_annotation(tag, old_version)? {
                let annotation = annotation.relabeled(new_version.clone());
                self.write_document(&self.document_path(tag, new_version, ANNOTATION_FILE)?, &annotation)?;
                Self::remove_file(&self.document_path(tag, old_version, ANNOTATION_FILE)?)?;
                moved_annotation = true;
            }
        }

        Self::remove_file(&self.document_path(tag, old_version, APPLICATION_FILE)?)?;
        Self::remove_file(&self.document_path(tag, old_version, FIXED_ANNOTATION_FILE)?)?;
        Self::remove_file(&self.slot_dir(tag, old_version)?.join(BROKEN_MARKER))?;
        self.remove_slot_if_empty(tag, old_version)?;

        info!("Relabeled application {} from {} to {}", tag, old_version, new_version);

        if let Err(e) = self.notify_application_changed(tag, new_version) {
            warn!("Rolling back relabel of {} from {} to {}", tag, old_version, new_version);
            self.relabel_back(tag, old_version, new_version, previous_application, moved_annotation)?;
            self.renotify_after_rollback(|l| {
                l.on_application_changed(tag, new_version)?;
                l.on_application_changed(tag, old_version)
            });
            return Err(e);
        }
        Ok(())
    }

    fn mark_as_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        let dir = self.slot_dir(tag, version)?;
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let marker = dir.join(BROKEN_MARKER);
        if !marker.exists() {
            fs::write(&marker, format!("{}\n", version))
                .with_context(|| format!("Failed to write {}", marker.display()))?;
            warn!("Marked {} at {} as broken", tag, version);
        }
        Ok(())
    }

    fn unmark_as_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        let marker = self.slot_dir(tag, version)?.join(BROKEN_MARKER);
        if marker.exists() {
            Self::remove_file(&marker)?;
            info!("Cleared broken marker of {} at {}", tag, version);
            self.remove_slot_if_empty(tag, version)?;
        }
        Ok(())
    }

    fn is_marked_broken(&self, tag: &str, version: &VersionOrTimestamp) -> Result<bool> {
        Ok(self.slot_dir(tag, version)?.join(BROKEN_MARKER).is_file())
    }

    fn save_fixed_annotation(&self, tag: &str, annotation: &ApplicationAnnotation) -> Result<()> {
        let version = Self::annotation_version(tag, annotation)?;
        self.write_document(&self.document_path(tag, version, FIXED_ANNOTATION_FILE)?, annotation)
    }

    fn read_fixed_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<Option<ApplicationAnnotation>> {
        self.read_document(&self.document_path(tag, version, FIXED_ANNOTATION_FILE)?)
    }

    fn delete_fixed_annotation(&self, tag: &str, version: &VersionOrTimestamp) -> Result<()> {
        Self::remove_file(&self.document_path(tag, version, FIXED_ANNOTATION_FILE)?)?;
        self.remove_slot_if_empty(tag, version)
    }

    fn register_listener(&self, listener: Weak<dyn IdpaStorageListener>) {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }
}
