//! The maildir-like message store.
//!
//! Layout, for a message with id `<id>`:
//!
//! - `<root>/<id>`: the message itself
//! - `<root>/.sending-<id>`: claim marker (hard link to the message);
//!   presence + mtime encode "a worker is attempting this message, since
//!   when"
//! - `<root>/.rejected-<id>`: permanently-refused marker (hard link);
//!   created before the original name is unlinked, so the bytes survive
//!
//! Hard-link creation is the atomicity primitive: `link()` fails with
//! `AlreadyExists` when the destination is present, which makes the claim
//! marker a cross-process mutex. `std::fs::hard_link` carries the same
//! guarantee on Windows (`CreateHardLinkW`), so there is no platform
//! special-casing here.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tracing::debug;

use crate::{
    error::{Result, SpoolError, ValidationError},
    types::MessageId,
};

/// The longest a single delivery attempt is expected to take. A claim marker
/// older than this is assumed to belong to a worker that died mid-send and
/// is removed so the message becomes claimable again. Sending very large
/// messages through very slow servers can therefore, in the worst case,
/// produce a duplicate delivery; that is the tradeoff the staleness rule
/// makes for crash recovery.
pub const MAX_SEND_TIME: Duration = Duration::from_secs(60 * 60 * 3);

const SENDING_PREFIX: &str = ".sending-";
const REJECTED_PREFIX: &str = ".rejected-";
const TMP_PREFIX: &str = ".tmp-";

/// A directory-backed queue of pending outbound messages.
///
/// Cloning is cheap and clones operate on the same directory; any number of
/// `Maildir` values (across threads or processes) may safely work the same
/// root concurrently; the claim protocol in [`try_claim`](Self::try_claim)
/// is the only synchronization.
#[derive(Debug, Clone)]
pub struct Maildir {
    root: PathBuf,
    max_send_time: Duration,
}

impl Maildir {
    /// Create a store rooted at `root` with the default claim staleness
    /// bound of [`MAX_SEND_TIME`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_send_time: MAX_SEND_TIME,
        }
    }

    /// Override the claim staleness bound.
    #[must_use]
    pub const fn with_max_send_time(mut self, max_send_time: Duration) -> Self {
        self.max_send_time = max_send_time;
        self
    }

    /// Initialize the store, creating the root directory if missing.
    ///
    /// # Errors
    /// If the root exists but is not a directory, or cannot be created.
    pub fn init(&self) -> Result<()> {
        if self.root.is_dir() {
            return Ok(());
        }
        if self.root.exists() {
            return Err(ValidationError::NotDirectory(self.root.display().to_string()).into());
        }
        fs::create_dir_all(&self.root).map_err(|source| ValidationError::CreateFailed {
            path: self.root.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// The store's root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Location of the message file for `id`.
    #[must_use]
    pub fn message_path(&self, id: &MessageId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Location of the claim marker for `id`.
    #[must_use]
    pub fn claim_path(&self, id: &MessageId) -> PathBuf {
        self.root.join(format!("{SENDING_PREFIX}{id}"))
    }

    /// Location of the rejected marker for `id`.
    #[must_use]
    pub fn rejected_path(&self, id: &MessageId) -> PathBuf {
        self.root.join(format!("{REJECTED_PREFIX}{id}"))
    }

    /// Snapshot the ids of all pending messages.
    ///
    /// Marker files (every dot-prefixed name) and subdirectories are
    /// skipped. No ordering is guaranteed; the directory is re-enumerated on
    /// every call, so a message claimed or finished by another worker after
    /// this returns may already be gone by the time it is attempted.
    pub fn list_pending(&self) -> Result<Vec<MessageId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                debug!(name = ?entry.file_name(), "skipping non-UTF-8 spool entry");
                continue;
            };
            if let Some(id) = MessageId::from_filename(name) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Attempt to exclusively claim `id` for delivery.
    ///
    /// Returns `Ok(false)` when the message is already claimed by a live
    /// worker, or has already been finished by one; both are benign. The
    /// sequence is deliberately check-staleness, touch-source, create-link:
    /// the hard link's existence is the single source of truth for "is
    /// anyone working on this", and touching the message first anchors
    /// staleness detection to the filesystem's own clock.
    pub fn try_claim(&self, id: &MessageId) -> Result<bool> {
        let claim = self.claim_path(id);

        match fs::metadata(&claim) {
            Ok(meta) => {
                let age = meta
                    .modified()
                    .map(|mtime| SystemTime::now().duration_since(mtime).unwrap_or_default())?;
                if age > self.max_send_time {
                    // A worker died mid-send. Remove the marker so the
                    // message can be attempted again; losing the race to
                    // another worker doing the same is fine.
                    debug!(%id, ?age, "removing stale claim marker");
                    remove_ignore_missing(&claim)?;
                } else {
                    return Ok(false);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match touch(&self.message_path(id)) {
            Ok(()) => {}
            // Someone else delivered or rejected it between listing and now.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        match fs::hard_link(self.message_path(id), &claim) {
            Ok(()) => Ok(true),
            // Another worker won the race for this message.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the raw bytes of a claimed message.
    pub fn read(&self, id: &MessageId) -> Result<Vec<u8>> {
        fs::read(self.message_path(id)).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SpoolError::NotFound(id.clone())
            } else {
                e.into()
            }
        })
    }

    /// Remove a delivered message and its claim marker.
    ///
    /// Either file may already be gone if another process cleaned up first;
    /// that is not an error.
    pub fn mark_delivered(&self, id: &MessageId) -> Result<()> {
        remove_ignore_missing(&self.message_path(id))?;
        remove_ignore_missing(&self.claim_path(id))?;
        Ok(())
    }

    /// Set aside a permanently-refused message.
    ///
    /// The message is hard-linked to its rejected name before the original
    /// is unlinked, so the bytes are never lost. A racing worker may have
    /// already rejected (marker exists) or finished (message gone) it; both
    /// are ignored.
    pub fn mark_rejected(&self, id: &MessageId) -> Result<()> {
        match fs::hard_link(self.message_path(id), self.rejected_path(id)) {
            Ok(()) => {}
            Err(e)
                if e.kind() == ErrorKind::AlreadyExists || e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        remove_ignore_missing(&self.message_path(id))?;
        remove_ignore_missing(&self.claim_path(id))?;
        Ok(())
    }

    /// Release a claim without touching the message, leaving it queued for
    /// the next scan. Used after a transient delivery failure or any
    /// unexpected error mid-attempt.
    pub fn release_claim(&self, id: &MessageId) -> Result<()> {
        remove_ignore_missing(&self.claim_path(id))?;
        Ok(())
    }

    /// Atomically add a new message to the queue.
    ///
    /// The content is written under a dot-prefixed temporary name (invisible
    /// to [`list_pending`](Self::list_pending)) and renamed into place, so a
    /// scan never observes a half-written message.
    pub fn enqueue(&self, content: &[u8]) -> Result<MessageId> {
        let id = MessageId::generate();
        let tmp = self.root.join(format!("{TMP_PREFIX}{id}"));
        fs::write(&tmp, content)?;
        match fs::rename(&tmp, self.message_path(&id)) {
            Ok(()) => Ok(id),
            Err(e) => {
                remove_ignore_missing(&tmp)?;
                Err(e.into())
            }
        }
    }
}

/// Update a file's mtime to now, in place.
fn touch(path: &Path) -> io::Result<()> {
    let file = fs::OpenOptions::new().append(true).open(path)?;
    file.set_times(fs::FileTimes::new().set_modified(SystemTime::now()))
}

/// Unlink a file, treating "already gone" as success, the expected
/// signature of benign contention between workers.
fn remove_ignore_missing(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
