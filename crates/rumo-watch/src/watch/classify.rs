// ── Event classification ─────────────────────────────────────────────────────

use notify::event::{EventKind, ModifyKind, RenameMode};
use rumo_sftp::TrackedExtensions;
use std::path::Path;

/// The two raw kinds a directory watch distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    /// File contents were written.
    ContentChanged,
    /// An entry appeared, disappeared or was renamed.
    NameChanged,
}

/// Collapse a `notify` event kind.  Access and metadata-only events yield
/// `None`.
///
/// A rename arrives as `Name(From)` and `Name(To)` followed by a `Name(Both)`
/// repeating both paths; only the first two are kept.
pub fn raw_kind(kind: &EventKind) -> Option<RawEventKind> {
    match kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => None,
        EventKind::Create(_) | EventKind::Remove(_) => Some(RawEventKind::NameChanged),
        EventKind::Modify(ModifyKind::Name(_)) => Some(RawEventKind::NameChanged),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other) => Some(RawEventKind::ContentChanged),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// What is on disk at an event path right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Directory,
    File,
    Missing,
}

impl Existence {
    pub fn of(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Existence::Directory,
            Ok(_) => Existence::File,
            Err(_) => Existence::Missing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    DirectoryCreated,
    DirectoryRemoved,
    FileChanged,
    FileCreated,
    FileDeleted,
    Ignored,
}

/// Classify one `(kind, path)` pair.
///
/// `known_directory` says whether the path currently holds a watch handle,
/// which is the only way to recognise a directory after it is gone.
pub fn classify(
    raw: RawEventKind,
    path: &Path,
    existence: Existence,
    known_directory: bool,
    extensions: &TrackedExtensions,
) -> ChangeClass {
    if existence == Existence::Directory {
        return ChangeClass::DirectoryCreated;
    }
    if known_directory && existence == Existence::Missing {
        return match raw {
            RawEventKind::NameChanged => ChangeClass::DirectoryRemoved,
            RawEventKind::ContentChanged => ChangeClass::Ignored,
        };
    }
    if !extensions.matches(path) {
        return ChangeClass::Ignored;
    }
    match (raw, existence) {
        (RawEventKind::ContentChanged, _) => ChangeClass::FileChanged,
        (RawEventKind::NameChanged, Existence::Missing) => ChangeClass::FileDeleted,
        (RawEventKind::NameChanged, _) => ChangeClass::FileCreated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    #[test]
    fn notify_kinds_collapse_to_two_raw_kinds() {
        assert_eq!(
            raw_kind(&EventKind::Create(CreateKind::File)),
            Some(RawEventKind::NameChanged)
        );
        assert_eq!(
            raw_kind(&EventKind::Remove(RemoveKind::Any)),
            Some(RawEventKind::NameChanged)
        );
        assert_eq!(
            raw_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(RawEventKind::NameChanged)
        );
        assert_eq!(
            raw_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(RawEventKind::NameChanged)
        );
        assert_eq!(
            raw_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::Any))),
            Some(RawEventKind::NameChanged)
        );
        assert_eq!(
            raw_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            None
        );
        assert_eq!(
            raw_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(RawEventKind::ContentChanged)
        );
        assert_eq!(
            raw_kind(&EventKind::Modify(ModifyKind::Any)),
            Some(RawEventKind::ContentChanged)
        );
        assert_eq!(
            raw_kind(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))),
            None
        );
        assert_eq!(raw_kind(&EventKind::Any), None);
    }

    #[test]
    fn directories_win_over_extensions() {
        let ext = TrackedExtensions::default();
        let class = classify(
            RawEventKind::NameChanged,
            Path::new("/b/vendor.js"),
            Existence::Directory,
            false,
            &ext,
        );
        assert_eq!(class, ChangeClass::DirectoryCreated);
    }

    #[test]
    fn vanished_known_directory_is_removed() {
        let ext = TrackedExtensions::default();
        let class = classify(
            RawEventKind::NameChanged,
            Path::new("/b/sub"),
            Existence::Missing,
            true,
            &ext,
        );
        assert_eq!(class, ChangeClass::DirectoryRemoved);
    }

    #[test]
    fn tracked_file_kinds() {
        let ext = TrackedExtensions::default();
        let p = Path::new("/b/a.js");
        assert_eq!(
            classify(RawEventKind::ContentChanged, p, Existence::File, false, &ext),
            ChangeClass::FileChanged
        );
        assert_eq!(
            classify(RawEventKind::NameChanged, p, Existence::File, false, &ext),
            ChangeClass::FileCreated
        );
        assert_eq!(
            classify(RawEventKind::NameChanged, p, Existence::Missing, false, &ext),
            ChangeClass::FileDeleted
        );
    }

    #[test]
    fn untracked_files_are_ignored() {
        let ext = TrackedExtensions::default();
        assert_eq!(
            classify(
                RawEventKind::NameChanged,
                Path::new("/b/a.ts"),
                Existence::File,
                false,
                &ext
            ),
            ChangeClass::Ignored
        );
    }
}
