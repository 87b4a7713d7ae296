//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements one step; the orchestrator in
//! [`crate::extract`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ classify ──▶ ingest ──▶ merge ──▶ dedup ──▶ format
//! (path)    (pdfium)   (vision)     (typed)    (group)   (drop)    (md/json)
//! ```
//!
//! 1. [`input`]    validate the local file, or stage in-memory bytes
//! 2. [`source`]   render selected pages and pull their text layer; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]   PNG-encode and base64-wrap each page image
//! 4. [`classify`] ask the vision model about each page; the only stage with
//!    network I/O
//! 5. [`ingest`]   turn the raw reply into a typed page result
//! 6. [`merge`]    fold continuation pages into one invoice
//! 7. [`dedup`]    drop invoices extracted more than once
//! 8. [`format`]   render the Markdown report and JSON payload
//!
//! Stages 5–8 are pure and synchronous.

pub mod classify;
pub mod dedup;
pub mod encode;
pub mod format;
pub mod ingest;
pub mod input;
pub mod merge;
pub mod source;
