//! Document source: turn a PDF into per-page images and text.
//!
//! [`DocumentSource`] is the seam between the orchestrator and whatever
//! produces page images. [`PdfiumSource`] is the production implementation;
//! tests substitute an in-memory one.
//!
//! Loading is synchronous: pdfium keeps thread-local state and is CPU-bound,
//! so the orchestrator calls [`DocumentSource::load`] from
//! `tokio::task::spawn_blocking`.
//!
//! A document that cannot be opened at all is a fatal [`InvoiceError`]. A
//! single page that fails to render is a [`Diagnostic::PageProcessingSkipped`]
//! in that page's slot, and the rest of the document still loads.

use crate::config::{ExtractionConfig, PageSelection};
use crate::error::{Diagnostic, InvoiceError};
use crate::pipeline::encode::encode_page;
use crate::pipeline::input::ResolvedInput;
use edgequake_llm::ImageData;
use pdfium_render::prelude::*;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// One page ready for classification.
#[derive(Clone)]
pub struct PageInput {
    /// 1-based page number in the source document.
    pub page_number: usize,
    pub image: ImageData,
    /// Embedded text layer, empty for scanned pages.
    pub text: String,
}

impl fmt::Debug for PageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageInput")
            .field("page_number", &self.page_number)
            .field("image_bytes_b64", &self.image.data.len())
            .field("text_chars", &self.text.chars().count())
            .finish()
    }
}

/// Everything a source produced, in page order.
#[derive(Debug)]
pub struct LoadedDocument {
    /// Page count of the whole document, before page selection.
    pub total_pages: usize,
    pub pages: Vec<Result<PageInput, Diagnostic>>,
}

/// Produces page inputs for the orchestrator.
pub trait DocumentSource: Send + Sync {
    /// Human-readable name for logs.
    fn describe(&self) -> String;

    /// Open the document and produce every selected page, in page order.
    fn load(&self) -> Result<LoadedDocument, InvoiceError>;
}

/// Renders pages of a PDF through pdfium.
#[derive(Debug)]
pub struct PdfiumSource {
    input: ResolvedInput,
    dpi: u32,
    max_rendered_pixels: u32,
    password: Option<String>,
    pages: PageSelection,
}

impl PdfiumSource {
    pub fn new(input: ResolvedInput, config: &ExtractionConfig) -> Self {
        Self {
            input,
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            pages: config.pages.clone(),
        }
    }

    fn open_error(&self, path: &Path, err: PdfiumError) -> InvoiceError {
        let detail = format!("{err:?}");
        if detail.to_lowercase().contains("password") {
            if self.password.is_some() {
                InvoiceError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                InvoiceError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            InvoiceError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    }
}

impl DocumentSource for PdfiumSource {
    fn describe(&self) -> String {
        self.input.path().display().to_string()
    }

    fn load(&self) -> Result<LoadedDocument, InvoiceError> {
        let path = self.input.path();
        let pdfium = Pdfium::default();
        let document = pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(|e| self.open_error(path, e))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let indices = self.pages.to_indices(total_pages);
        if indices.is_empty() {
            return Err(InvoiceError::NoPagesSelected { total: total_pages });
        }

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let loaded = indices
            .into_iter()
            .map(|idx| {
                let page_number = idx + 1;
                render_one(&pages, idx, &render_config).map_err(|detail| {
                    warn!("Page {}: skipped: {}", page_number, detail);
                    Diagnostic::PageProcessingSkipped {
                        page: page_number,
                        detail,
                    }
                })
            })
            .collect();

        Ok(LoadedDocument {
            total_pages,
            pages: loaded,
        })
    }
}

fn render_one(
    pages: &PdfPages<'_>,
    idx: usize,
    render_config: &PdfRenderConfig,
) -> Result<PageInput, String> {
    let page_number = idx + 1;
    let page = pages
        .get(idx as u16)
        .map_err(|e| format!("cannot open page: {e:?}"))?;

    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| format!("rasterisation failed: {e:?}"))?;
    let image = bitmap.as_image();
    let encoded = encode_page(&image).map_err(|e| format!("image encoding failed: {e}"))?;

    let text = match page.text() {
        Ok(t) => t.all(),
        Err(e) => {
            debug!("Page {}: no text layer ({:?})", page_number, e);
            String::new()
        }
    };

    debug!(
        "Rendered page {} → {}x{} px, {} text chars",
        page_number,
        image.width(),
        image.height(),
        text.len()
    );

    Ok(PageInput {
        page_number,
        image: encoded,
        text,
    })
}
