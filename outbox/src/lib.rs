//! Supervisor for the outbox queue processor.
//!
//! Resolves configuration from the command line and an optional TOML file,
//! wires a [`outbox_spool::Maildir`] and an
//! [`outbox_delivery::SmtpMailer`] into a
//! [`outbox_delivery::QueueProcessor`], and runs it once or as a daemon.

pub mod config;
