//! Minimal asynchronous SMTP client.
//!
//! Implements just the client side of a submission transaction: greeting,
//! `EHLO`, opportunistic or mandatory STARTTLS, `AUTH PLAIN`, and the
//! `MAIL FROM` / `RCPT TO` / `DATA` / `QUIT` sequence. Response codes are
//! returned as data; classifying them into delivery outcomes is the
//! caller's concern.

pub mod client;
pub mod error;
pub mod response;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use response::Response;
