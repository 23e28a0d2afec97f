//! Durable on-disk queue for outbound mail.
//!
//! Each pending message is a single regular file in the spool root. All
//! coordination between workers (in this process or any other) happens
//! through the filesystem: a hard link named `.sending-<id>` marks a message
//! as claimed, and a hard link named `.rejected-<id>` sets aside a message
//! the server has permanently refused. No database, no in-memory index:
//! the directory is the sole source of truth, so a crashed worker loses
//! nothing but its in-flight attempt.

pub mod error;
pub mod maildir;
pub mod types;

pub use error::{Result, SpoolError, ValidationError};
pub use maildir::{Maildir, MAX_SEND_TIME};
pub use types::MessageId;
