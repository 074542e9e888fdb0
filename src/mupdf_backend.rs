//! MuPDF document backend
//!
//! MuPDF documents are bound to the thread that opened them, so the backend
//! only keeps the path and the page sizes read at open time. Each worker
//! thread opens the document on first use and keeps it until it is asked for
//! a different file.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use mupdf::{Colorspace, Document, Matrix, Page, TextBlockType, TextPageFlags};

use crate::backend::{BackendError, DocumentBackend, RawPixmap, RawWord};
use crate::types::{BBox, PageSize};

thread_local! {
    /// Last document opened on this thread, keyed by path
    static OPEN_DOCUMENT: RefCell<Option<(PathBuf, Document)>> = const { RefCell::new(None) };
}

impl From<mupdf::error::Error> for BackendError {
    fn from(err: mupdf::error::Error) -> Self {
        Self::generic(err.to_string())
    }
}

/// PDF (and other MuPDF formats) opened from a file
#[derive(Debug)]
pub struct MupdfBackend {
    path: PathBuf,
    sizes: Vec<PageSize>,
}

impl MupdfBackend {
    /// Open `path` and read every page size
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        let doc = open_document(&path)?;

        let count = doc.page_count()?.max(0) as usize;
        let mut sizes = Vec::with_capacity(count);
        for index in 0..count {
            let bounds = doc.load_page(index as i32)?.bounds()?;
            sizes.push(PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0));
        }

        Ok(Self { path, sizes })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_page(&self, index: usize) -> Result<Page, BackendError> {
        if index >= self.sizes.len() {
            return Err(BackendError::PageOutOfRange {
                page: index,
                count: self.sizes.len(),
            });
        }
        with_document(&self.path, |doc| Ok(doc.load_page(index as i32)?))
    }
}

/// Run `f` against this thread's handle for `path`, opening it if the thread
/// holds no handle or one for another file
fn with_document<R>(
    path: &Path,
    f: impl FnOnce(&Document) -> Result<R, BackendError>,
) -> Result<R, BackendError> {
    OPEN_DOCUMENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let doc = match slot.take() {
            Some((open, doc)) if open == path => doc,
            _ => open_document(path)?,
        };
        let result = f(&doc);
        *slot = Some((path.to_path_buf(), doc));
        result
    })
}

fn open_document(path: &Path) -> Result<Document, BackendError> {
    Document::open(path.to_string_lossy().as_ref())
        .map_err(|e| BackendError::Open(format!("{}: {e}", path.display())))
}

impl DocumentBackend for MupdfBackend {
    fn page_count(&self) -> usize {
        self.sizes.len()
    }

    fn page_size(&self, index: usize) -> Result<PageSize, BackendError> {
        self.sizes
            .get(index)
            .copied()
            .ok_or(BackendError::PageOutOfRange {
                page: index,
                count: self.sizes.len(),
            })
    }

    fn rasterize(&self, index: usize, scale: f32) -> Result<RawPixmap, BackendError> {
        let page = self.load_page(index)?;
        let pixmap = page.to_pixmap(
            &Matrix::new_scale(scale, scale),
            &Colorspace::device_rgb(),
            false,
            false,
        )?;

        Ok(RawPixmap {
            width: pixmap.width(),
            height: pixmap.height(),
            channels: pixmap.n(),
            stride: pixmap.stride() as usize,
            samples: pixmap.samples().to_vec(),
        })
    }

    fn extract_words(&self, index: usize) -> Result<Vec<RawWord>, BackendError> {
        let page = self.load_page(index)?;
        let origin = page.bounds()?;
        let text_page = page.to_text_page(TextPageFlags::empty())?;

        let mut words = Vec::new();
        for block in text_page.blocks() {
            if block.r#type() != TextBlockType::Text {
                continue;
            }
            for line in block.lines() {
                let mut current: Option<RawWord> = None;

                for ch in line.chars() {
                    let Some(c) = ch.char() else {
                        continue;
                    };
                    if c.is_whitespace() {
                        words.extend(current.take());
                        continue;
                    }

                    let quad = ch.quad();
                    let bbox = BBox::new(
                        quad.ul.x.min(quad.ll.x) - origin.x0,
                        quad.ul.y.min(quad.ur.y) - origin.y0,
                        quad.ur.x.max(quad.lr.x) - origin.x0,
                        quad.ll.y.max(quad.lr.y) - origin.y0,
                    );

                    match current.as_mut() {
                        Some(word) => {
                            word.text.push(c);
                            word.bbox = union(word.bbox, bbox);
                        }
                        None => {
                            current = Some(RawWord {
                                text: c.to_string(),
                                bbox,
                            });
                        }
                    }
                }

                words.extend(current);
            }
        }

        Ok(words)
    }
}

fn union(a: BBox, b: BBox) -> BBox {
    BBox::new(a.x0.min(b.x0), a.y0.min(b.y0), a.x1.max(b.x1), a.y1.max(b.y1))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    /// One blank 200x300pt page; MuPDF rebuilds the missing xref table
    const BLANK_PAGE: &str = "%PDF-1.4
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj
3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 200 300] >> endobj
trailer << /Root 1 0 R >>
%%EOF
";

    fn blank_pdf() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .expect("temp file");
        file.write_all(BLANK_PAGE.as_bytes()).expect("write pdf");
        file
    }

    fn open_path() -> Option<PathBuf> {
        OPEN_DOCUMENT.with(|slot| slot.borrow().as_ref().map(|(path, _)| path.clone()))
    }

    #[test]
    fn reads_page_sizes_at_open() {
        let file = blank_pdf();
        let backend = MupdfBackend::open(file.path()).expect("open");

        assert_eq!(backend.page_count(), 1);
        let size = backend.page_size(0).expect("size");
        assert_eq!((size.width, size.height), (200.0, 300.0));
        assert!(backend.page_size(1).is_err());
    }

    #[test]
    fn worker_thread_keeps_document_open() {
        let file = blank_pdf();
        let backend = MupdfBackend::open(file.path()).expect("open");

        let first = backend.rasterize(0, 0.5).expect("rasterize");
        assert_eq!((first.width, first.height), (100, 150));
        assert_eq!(open_path().as_deref(), Some(backend.path()));

        let words = backend.extract_words(0).expect("words");
        assert!(words.is_empty());
        assert_eq!(open_path().as_deref(), Some(backend.path()));

        // A second file replaces the handle
        let other = blank_pdf();
        let other_backend = MupdfBackend::open(other.path()).expect("open");
        let _ = other_backend.rasterize(0, 1.0).expect("rasterize");
        assert_eq!(open_path().as_deref(), Some(other_backend.path()));
    }
}
