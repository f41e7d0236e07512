use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::models::*;
use crate::reference::ReferenceId;

pub const SAMPLE_NAME: &str = "input.tex";

pub const SAMPLE_DOCUMENT: &str = r"% sample document
\documentclass{article}
\usepackage{blindtext}

\begin{document}
  \tableofcontents
  \Blinddocument
\end{document}";

// Shared by every entry ever created in this process, so ids are never reused.
static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

fn next_entry_id() -> EntryId {
    EntryId(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
}

impl FileEntry {
    fn new(kind: EntryKind) -> Self {
        Self {
            id: next_entry_id(),
            kind,
            name: String::new(),
            content: EntryContent::empty_for(kind),
            upload: UploadMode::Inline,
        }
    }

    /// Reference store id of the current contents.
    pub fn reference_id(&self) -> ReferenceId {
        ReferenceId::of(&self.content.to_bytes())
    }
}

impl LocalFile {
    /// Reads a file from disk, keeping its file name as the entry name.
    pub async fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        let data = tokio::fs::read(path).await?;
        Ok(Self {
            name,
            data: Bytes::from(data),
        })
    }
}

/// The in-memory multi-file job: an ordered list of entries plus the id of
/// the entry the service should compile.
#[derive(Debug, Clone)]
pub struct Document {
    entries: Vec<FileEntry>,
    main_id: EntryId,
}

impl Default for Document {
    fn default() -> Self {
        Self::with_sample()
    }
}

impl Document {
    /// A document seeded with one text entry holding the sample document.
    pub fn with_sample() -> Self {
        let mut main = FileEntry::new(EntryKind::Text);
        main.name = SAMPLE_NAME.to_string();
        main.content = EntryContent::Text(SAMPLE_DOCUMENT.to_string());
        Self {
            main_id: main.id,
            entries: vec![main],
        }
    }

    /// A document with a single, empty text entry as main.
    pub fn empty() -> Self {
        let main = FileEntry::new(EntryKind::Text);
        Self {
            main_id: main.id,
            entries: vec![main],
        }
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut FileEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn main_id(&self) -> EntryId {
        self.main_id
    }

    /// The main entry, or `None` if it was removed.
    pub fn main_entry(&self) -> Option<&FileEntry> {
        self.entry(self.main_id)
    }

    pub fn set_main(&mut self, id: EntryId) {
        self.main_id = id;
    }

    pub fn create_text_entry(&mut self) -> EntryId {
        self.push(FileEntry::new(EntryKind::Text))
    }

    pub fn create_file_entry(&mut self) -> EntryId {
        self.push(FileEntry::new(EntryKind::File))
    }

    fn push(&mut self, entry: FileEntry) -> EntryId {
        let id = entry.id;
        debug!("adding {:?} entry {}", entry.kind, id);
        self.entries.push(entry);
        id
    }

    /// Removes the entry with `id`. Absent ids are ignored. Removing the main
    /// entry leaves `main_id` dangling until `set_main` is called again.
    pub fn remove_entry(&mut self, id: EntryId) {
        if let Some(idx) = self.entries.iter().position(|e| e.id == id) {
            self.entries.remove(idx);
        }
    }

    pub fn rename_entry(&mut self, id: EntryId, name: impl Into<String>) {
        if let Some(entry) = self.entry_mut(id) {
            entry.name = name.into();
        }
    }

    /// Replaces the content of a text entry. File entries are left alone.
    pub fn set_text(&mut self, id: EntryId, text: impl Into<String>) {
        if let Some(entry) = self.entry_mut(id) {
            if entry.kind == EntryKind::Text {
                entry.content = EntryContent::Text(text.into());
            }
        }
    }

    /// Stores a picked file in a file entry, taking over the picked file's
    /// name. Nothing happens when no file was picked.
    pub fn attach_local_file(&mut self, id: EntryId, file: Option<LocalFile>) {
        let Some(file) = file else {
            return;
        };
        if let Some(entry) = self.entry_mut(id) {
            if entry.kind == EntryKind::File {
                debug!("attaching {} ({} bytes) to entry {}", file.name, file.data.len(), id);
                entry.name = file.name;
                entry.content = EntryContent::Binary(file.data);
            }
        }
    }

    pub fn set_upload_mode(&mut self, id: EntryId, mode: UploadMode) {
        if let Some(entry) = self.entry_mut(id) {
            entry.upload = mode;
        }
    }

    /// Switches entries sent by reference whose contents the service has
    /// lost back to `Store`, so the next submission uploads them again.
    /// Returns how many entries were switched.
    pub fn restore_references(&mut self, missing: &[ReferenceId]) -> usize {
        let mut switched = 0;
        for entry in &mut self.entries {
            if entry.upload == UploadMode::Reference && missing.contains(&entry.reference_id()) {
                debug!("re-uploading {} ({})", entry.name, entry.id);
                entry.upload = UploadMode::Store;
                switched += 1;
            }
        }
        switched
    }

    /// Occurrences of each non-empty entry name. Any count above one is a
    /// collision the user should be warned about.
    pub fn duplicate_name_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            if entry.name.is_empty() {
                continue;
            }
            *counts.entry(entry.name.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn has_duplicate_names(&self) -> bool {
        self.duplicate_name_counts().values().any(|&n| n > 1)
    }
}
