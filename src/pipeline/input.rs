//! Input resolution: validate a local PDF before pdfium sees it.
//!
//! pdfium reports a missing file, an HTML error page saved as `.pdf` and a
//! truncated download all as the same opaque load error. Checking existence,
//! permissions, size and the `%PDF` magic up front gives the caller a
//! specific [`InvoiceError`] instead.

use crate::error::InvoiceError;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A PDF that passed validation. In-memory inputs are staged in a temp file
/// that lives as long as this value.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    Staged(NamedTempFile),
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Staged(f) => f.path(),
        }
    }
}

/// Validate a local path.
pub fn resolve_input(path: impl AsRef<Path>, max_size_mb: u64) -> Result<ResolvedInput, InvoiceError> {
    let path = path.as_ref().to_path_buf();

    let meta = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(InvoiceError::PermissionDenied { path })
        }
        Err(_) => return Err(InvoiceError::FileNotFound { path }),
    };
    if !meta.is_file() {
        return Err(InvoiceError::FileNotFound { path });
    }
    check_size(&path, meta.len(), max_size_mb)?;

    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(InvoiceError::PermissionDenied { path })
        }
        Err(_) => return Err(InvoiceError::FileNotFound { path }),
    };
    let mut magic = [0u8; 4];
    let n = read_prefix(&mut file, &mut magic);
    check_magic(&path, &magic[..n])?;

    debug!("Resolved local PDF: {} ({} bytes)", path.display(), meta.len());
    Ok(ResolvedInput::Local(path))
}

/// Validate in-memory bytes and stage them in a temp file for pdfium.
pub fn stage_bytes(bytes: &[u8], max_size_mb: u64) -> Result<ResolvedInput, InvoiceError> {
    let label = PathBuf::from("<memory>");
    check_size(&label, bytes.len() as u64, max_size_mb)?;
    check_magic(&label, &bytes[..bytes.len().min(4)])?;

    let mut staged = tempfile::Builder::new()
        .prefix("invoice2md-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create temp file: {e}")))?;
    staged
        .write_all(bytes)
        .and_then(|_| staged.flush())
        .map_err(|e| InvoiceError::Internal(format!("Failed to stage PDF bytes: {e}")))?;

    debug!("Staged {} bytes at {}", bytes.len(), staged.path().display());
    Ok(ResolvedInput::Staged(staged))
}

fn check_size(path: &Path, size: u64, limit_mb: u64) -> Result<(), InvoiceError> {
    let size_mb = size.div_ceil(1024 * 1024);
    if size > limit_mb.saturating_mul(1024 * 1024) {
        return Err(InvoiceError::FileTooLarge {
            path: path.to_path_buf(),
            size_mb,
            limit_mb,
        });
    }
    Ok(())
}

fn check_magic(path: &Path, prefix: &[u8]) -> Result<(), InvoiceError> {
    if prefix == b"%PDF" {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    magic[..prefix.len()].copy_from_slice(prefix);
    Err(InvoiceError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

fn read_prefix(file: &mut File, buf: &mut [u8; 4]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    filled
}
