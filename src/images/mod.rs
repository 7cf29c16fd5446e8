//! Image Reference Tracker
//!
//! Per-color bookkeeping of image slots while a product is being edited. A
//! slot is `uploading` from file selection until the object store returns a
//! key, then `uploaded`. Freshly uploaded slots show a local preview held by a
//! [`PreviewLease`]; the lease is released when the slot is replaced, removed,
//! or the session is dropped. Persisted slots show a remote URL.
//!
//! The tracker never talks to storage itself. Operations that orphan an
//! unsaved upload return its key so the caller can delete the object. A slot
//! dropped while still uploading leaves a tombstone; when that upload lands,
//! [`ImageTracker::complete_upload`] hands its key back for deletion.

use futures::future::join_all;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::schemas::{ColorView, ImageEntry, MAX_IMAGES_PER_COLOR};
use crate::storage::ObjectStore;

/// Releases local preview URLs (object URLs of selected files).
pub trait PreviewReleaser: Send + Sync {
    fn release(&self, url: &str);
}

/// Scoped ownership of one local preview URL. Released exactly once, on drop.
pub struct PreviewLease {
    url: String,
    releaser: Arc<dyn PreviewReleaser>,
}

impl PreviewLease {
    pub fn acquire(url: impl Into<String>, releaser: Arc<dyn PreviewReleaser>) -> Self {
        Self { url: url.into(), releaser }
    }
    pub fn url(&self) -> &str { &self.url }
}

impl Drop for PreviewLease {
    fn drop(&mut self) { self.releaser.release(&self.url); }
}

impl fmt::Debug for PreviewLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("PreviewLease").field(&self.url).finish() }
}

#[derive(Debug)]
pub enum Display {
    Remote(String),
    Local(PreviewLease),
}

impl Display {
    pub fn url(&self) -> &str {
        match self { Self::Remote(url) => url, Self::Local(lease) => lease.url() }
    }
}

#[derive(Debug)]
pub enum SlotState {
    Uploading,
    Uploaded { key: String, display: Display },
}

#[derive(Debug)]
pub struct ImageSlot {
    image_id: String,
    state: SlotState,
}

impl ImageSlot {
    pub fn image_id(&self) -> &str { &self.image_id }
    pub fn state(&self) -> &SlotState { &self.state }
    pub fn key(&self) -> Option<&str> {
        match &self.state { SlotState::Uploaded { key, .. } => Some(key), SlotState::Uploading => None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Another slot already uses this image id.
    Duplicate(String),
    NotFound(String),
    /// The slot is not in the state the operation needs.
    NotUploading(String),
    Full,
    StillUploading,
}
impl std::error::Error for TrackerError {}
impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "image {id} is already attached"),
            Self::NotFound(id) => write!(f, "image {id} not found"),
            Self::NotUploading(id) => write!(f, "image {id} is not uploading"),
            Self::Full => write!(f, "at most {MAX_IMAGES_PER_COLOR} images per color"),
            Self::StillUploading => write!(f, "an image is still uploading"),
        }
    }
}

/// Image slots of one color variant.
#[derive(Debug, Default)]
pub struct ImageTracker {
    slots: Vec<ImageSlot>,
    /// Image ids whose slot went away while the upload was in flight.
    cancelled: HashSet<String>,
}

impl ImageTracker {
    pub fn new() -> Self { Self::default() }

    /// Slots for a saved color; `(key, url)` pairs in display order. The key
    /// doubles as the image id.
    pub fn from_persisted(images: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut tracker = Self::new();
        for (key, url) in images {
            tracker.slots.push(ImageSlot { image_id: key.clone(), state: SlotState::Uploaded { key, display: Display::Remote(url) } });
        }
        tracker
    }

    pub fn from_view(color: &ColorView) -> Self {
        Self::from_persisted(color.images.iter().map(|i| (i.image_key.clone(), i.image_url.clone())))
    }

    pub fn slots(&self) -> &[ImageSlot] { &self.slots }
    pub fn len(&self) -> usize { self.slots.len() }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
    pub fn is_uploading(&self) -> bool { self.slots.iter().any(|s| matches!(s.state, SlotState::Uploading)) }

    fn position(&self, image_id: &str) -> Option<usize> { self.slots.iter().position(|s| s.image_id == image_id) }

    fn taken(&self, image_id: &str) -> bool { self.position(image_id).is_some() || self.cancelled.contains(image_id) }

    /// Leaves a tombstone for a slot dropped mid-upload.
    fn discard(&mut self, slot: ImageSlot) -> Option<String> {
        if matches!(slot.state, SlotState::Uploading) {
            self.cancelled.insert(slot.image_id);
            return None;
        }
        Self::unsaved_key(&slot)
    }

    /// Key of an uploaded slot that was never saved with the product.
    fn unsaved_key(slot: &ImageSlot) -> Option<String> {
        match &slot.state {
            SlotState::Uploaded { key, display: Display::Local(_) } => Some(key.clone()),
            _ => None,
        }
    }

    /// A file was selected for a new slot.
    pub fn begin_upload(&mut self, image_id: impl Into<String>) -> Result<(), TrackerError> {
        let image_id = image_id.into();
        if self.taken(&image_id) { return Err(TrackerError::Duplicate(image_id)); }
        if self.slots.len() >= MAX_IMAGES_PER_COLOR { return Err(TrackerError::Full); }
        self.slots.push(ImageSlot { image_id, state: SlotState::Uploading });
        Ok(())
    }

    /// A file was selected to replace slot `old_id` in place. Returns the key
    /// to delete now: only an unsaved upload is deleted immediately, a saved
    /// image is left for reconciliation to remove once the edit is submitted.
    pub fn begin_replace(&mut self, old_id: &str, new_id: impl Into<String>) -> Result<Option<String>, TrackerError> {
        let new_id = new_id.into();
        let index = self.position(old_id).ok_or_else(|| TrackerError::NotFound(old_id.to_string()))?;
        let reused = new_id == old_id && !matches!(self.slots[index].state, SlotState::Uploading);
        if !reused && self.taken(&new_id) { return Err(TrackerError::Duplicate(new_id)); }
        let old = std::mem::replace(&mut self.slots[index], ImageSlot { image_id: new_id, state: SlotState::Uploading });
        Ok(self.discard(old))
    }

    /// The upload of `image_id` finished with storage `key`. Returns the key
    /// when the slot was replaced or removed in the meantime: the object is
    /// unreferenced and the caller should delete it.
    pub fn complete_upload(&mut self, image_id: &str, key: impl Into<String>, preview: PreviewLease) -> Result<Option<String>, TrackerError> {
        if self.cancelled.remove(image_id) {
            drop(preview);
            return Ok(Some(key.into()));
        }
        let index = self.position(image_id).ok_or_else(|| TrackerError::NotFound(image_id.to_string()))?;
        let slot = &mut self.slots[index];
        if !matches!(slot.state, SlotState::Uploading) { return Err(TrackerError::NotUploading(image_id.to_string())); }
        slot.state = SlotState::Uploaded { key: key.into(), display: Display::Local(preview) };
        Ok(None)
    }

    /// The upload of `image_id` failed; its slot goes away.
    pub fn fail_upload(&mut self, image_id: &str) -> Result<(), TrackerError> {
        if self.cancelled.remove(image_id) { return Ok(()); }
        let index = self.position(image_id).ok_or_else(|| TrackerError::NotFound(image_id.to_string()))?;
        if !matches!(self.slots[index].state, SlotState::Uploading) { return Err(TrackerError::NotUploading(image_id.to_string())); }
        self.slots.remove(index);
        Ok(())
    }

    /// Removes a slot. Returns the key to delete now (unsaved uploads only).
    pub fn remove(&mut self, image_id: &str) -> Result<Option<String>, TrackerError> {
        let index = self.position(image_id).ok_or_else(|| TrackerError::NotFound(image_id.to_string()))?;
        let slot = self.slots.remove(index);
        Ok(self.discard(slot))
    }

    /// Form entries for submission. Blocked while any slot is uploading.
    pub fn submission(&self) -> Result<Vec<ImageEntry>, TrackerError> {
        if self.is_uploading() { return Err(TrackerError::StillUploading); }
        Ok(self.entries())
    }

    /// Form entries in slot order, uploading slots included.
    pub fn entries(&self) -> Vec<ImageEntry> {
        self.slots
            .iter()
            .map(|slot| match &slot.state {
                SlotState::Uploading => ImageEntry::Uploading { image_id: slot.image_id.clone() },
                SlotState::Uploaded { key, display } => ImageEntry::Success {
                    image_id: slot.image_id.clone(),
                    image_key: Some(key.clone()),
                    image_url: Some(display.url().to_string()),
                },
            })
            .collect()
    }

    /// Ends the session after the product was saved. Uploaded objects now
    /// belong to the product; previews are released.
    pub fn commit(self) {
        tracing::trace!(slots = self.slots.len(), "image session committed");
    }

    /// Ends the session without saving. Previews are released and the keys of
    /// unsaved uploads are returned for deletion.
    pub fn abandon(self) -> Vec<String> {
        self.slots.iter().filter_map(Self::unsaved_key).collect()
    }
}

/// Abandons every tracker of an editing session and deletes the objects of
/// unsaved uploads concurrently. Returns the keys whose delete succeeded.
pub async fn discard_unsaved(trackers: impl IntoIterator<Item = ImageTracker>, objects: &dyn ObjectStore) -> Vec<String> {
    let keys: Vec<String> = trackers.into_iter().flat_map(ImageTracker::abandon).collect();
    let results = join_all(keys.iter().map(|key| objects.delete_object(key))).await;
    keys.into_iter()
        .zip(results)
        .filter_map(|(key, result)| match result {
            Ok(outcome) if outcome.success => Some(key),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to delete abandoned upload");
                None
            }
        })
        .collect()
}
