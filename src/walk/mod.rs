//! Deterministic, resumable filesystem walker.
//!
//! Built on `walkdir`'s single-threaded iterator, sorting each directory's
//! children by name before descending. Because `/` (0x2F) sorts below every
//! valid filename byte, depth-first traversal with per-directory name
//! sorting produces entries in full lexicographic order of their path
//! relative to the root: a directory always sorts before anything inside
//! it, and two siblings compare the same way whether compared as path
//! strings or as walk order. A parallel walk cannot make this guarantee, so
//! it has no place here: resuming a scan depends on "every path ≤
//! resume_from has already been seen."

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, bounded};
use walkdir::WalkDir;

use crate::error::FixityError;

const WALK_CHANNEL_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct WalkRecord {
    pub path: PathBuf,
    pub size: u64,
    pub mtime_unix: i64,
}

#[derive(Debug, Clone)]
pub enum WalkEvent {
    Entry(WalkRecord),
    EntryError { path: Option<PathBuf>, message: String },
}

pub struct Walk {
    pub events: Receiver<WalkEvent>,
    handle: Option<JoinHandle<()>>,
}

impl Walk {
    /// Joins the walk thread. Only needed for tests and graceful shutdown;
    /// dropping a `Walk` whose receiver is abandoned mid-stream is fine, the
    /// walk thread simply stops sending on the next entry.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Starts walking `root` in a background thread, filtering out anything
/// lexicographically ≤ `resume_from`. Fails synchronously, before spawning
/// anything, if `root` itself cannot be opened — a hard failure opening the
/// walk root is fatal and must never show up as a mid-stream entry error.
pub fn walk(root: &Path, resume_from: Option<PathBuf>) -> Result<Walk, FixityError> {
    std::fs::metadata(root).map_err(|source| FixityError::WalkRootFailure {
        path: root.to_path_buf(),
        source,
    })?;

    let (tx, rx) = bounded(WALK_CHANNEL_CAP);
    let root = root.to_path_buf();

    let handle = thread::spawn(move || {
        let walker = WalkDir::new(&root).sort_by(|a, b| sibling_sort_key(a).cmp(&sibling_sort_key(b)));
        for entry in walker {
            let outcome = match entry {
                Ok(entry) => entry_to_event(&entry, &root),
                Err(err) => WalkEvent::EntryError {
                    path: err.path().map(PathBuf::from),
                    message: err.to_string(),
                },
            };
            if let WalkEvent::Entry(ref record) = outcome {
                if !entry_passes_filters(record, resume_from.as_deref()) {
                    continue;
                }
            }
            if tx.send(outcome).is_err() {
                break;
            }
        }
    });

    Ok(Walk {
        events: rx,
        handle: Some(handle),
    })
}

/// Sort key for siblings in one directory. A directory's name is compared
/// as if it carried a trailing `/`: plain string comparison of file names
/// puts a directory named `a` before a file named `a.txt` (`"a"` is a
/// prefix of `"a.txt"`), but the true relative-path order puts `a.txt`
/// first, because `.` (0x2E) sorts below `/` (0x2F). Appending the
/// separator to directory names before comparing restores agreement
/// between sibling order and full relative-path order, which is what makes
/// `/`'s position in the ASCII table usable for resume at all.
fn sibling_sort_key(entry: &walkdir::DirEntry) -> Vec<u8> {
    let mut key = entry.file_name().to_string_lossy().into_owned().into_bytes();
    if entry.file_type().is_dir() {
        key.push(b'/');
    }
    key
}

fn entry_to_event(entry: &walkdir::DirEntry, root: &Path) -> WalkEvent {
    if !entry.file_type().is_file() {
        return WalkEvent::Entry(WalkRecord {
            path: PathBuf::new(),
            size: 0,
            mtime_unix: 0,
        });
    }
    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
    match entry.metadata() {
        Ok(meta) => {
            let mtime_unix = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            WalkEvent::Entry(WalkRecord {
                path: rel.to_path_buf(),
                size: meta.len(),
                mtime_unix,
            })
        }
        Err(err) => WalkEvent::EntryError {
            path: Some(rel.to_path_buf()),
            message: err.to_string(),
        },
    }
}

fn entry_passes_filters(record: &WalkRecord, resume_from: Option<&Path>) -> bool {
    if record.path.as_os_str().is_empty() {
        // Directory entries carry no fixity-relevant state of their own.
        return false;
    }
    match resume_from {
        Some(marker) => path_sort_key(&record.path) > path_sort_key(marker),
        None => true,
    }
}

/// Comparison key agreeing with the walk's real traversal order, unlike
/// `PathBuf`'s own `Ord` (which compares component-wise and disagrees with
/// full relative-path order whenever a file and a directory share a name
/// prefix, e.g. `report.pdf` next to `report/`). The native path string
/// already contains `/` between components, so comparing it byte-wise is
/// equivalent to `sibling_sort_key`'s trailing-slash trick applied at every
/// level instead of just between direct siblings.
fn path_sort_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
