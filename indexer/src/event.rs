//! File events delivered by the watch primitive.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A file system change under a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of change.
    pub kind: FileEventKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// Entry was created.
    Created,

    /// Entry content was modified.
    Modified,

    /// Entry was deleted.
    Deleted,
}

impl FileEventKind {
    /// Map a notify event kind onto the three kinds the indexer reacts to.
    ///
    /// Renames surface as delete-of-old-name and create-of-new-name;
    /// metadata and access events are dropped.
    pub(crate) fn from_notify(kind: notify::EventKind) -> Option<Self> {
        use notify::EventKind;
        use notify::event::{ModifyKind, RenameMode};

        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Remove(_) => Some(Self::Deleted),
            EventKind::Modify(modify) => match modify {
                ModifyKind::Name(RenameMode::From) => Some(Self::Deleted),
                ModifyKind::Name(RenameMode::To) => Some(Self::Created),
                ModifyKind::Metadata(_) => None,
                _ => Some(Self::Modified),
            },
            _ => None,
        }
    }
}
