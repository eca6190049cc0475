use std::convert::TryFrom;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use thiserror::Error;
use tracing::{info, instrument, warn};

use pageview_core::config::EngineConfig;
use pageview_core::error::DecodeError;
use pageview_core::{
    document_id_for_source, DocumentBackend, DocumentDecoder, DocumentInfo, DocumentMetadata,
    PageContent, RenderImage, RenderRequest,
};

/// Overrides the library lookup when no path is configured.
pub const LIBRARY_PATH_ENV: &str = "PAGEVIEW_PDFIUM_LIBRARY_PATH";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to bind to a pdfium library; ensure it is installed ({0})")]
    Bind(String),
    #[error("pdfium is already bound with {active:?}; refusing to rebind with {requested:?}")]
    Reconfigured {
        active: EngineConfig,
        requested: EngineConfig,
    },
}

struct Engine {
    config: EngineConfig,
    pdfium: Arc<Pdfium>,
}

static ENGINE: OnceCell<Engine> = OnceCell::new();

/// Binds pdfium for the whole process. Calling again with the same
/// configuration is a no-op; a different one is rejected.
pub fn initialize(config: &EngineConfig) -> Result<(), EngineError> {
    let engine = ENGINE.get_or_try_init(|| bind(config))?;
    if &engine.config != config {
        return Err(EngineError::Reconfigured {
            active: engine.config.clone(),
            requested: config.clone(),
        });
    }
    Ok(())
}

fn engine() -> Result<&'static Engine, EngineError> {
    ENGINE.get_or_try_init(|| bind(&EngineConfig::default()))
}

fn bind(config: &EngineConfig) -> Result<Engine, EngineError> {
    let env_path = std::env::var_os(LIBRARY_PATH_ENV).map(PathBuf::from);
    let mut errors = Vec::new();

    for candidate in library_candidates(config, env_path) {
        match Pdfium::bind_to_library(&candidate) {
            Ok(bindings) => {
                info!(path = %candidate.display(), "bound pdfium");
                return Ok(Engine {
                    config: config.clone(),
                    pdfium: Arc::new(Pdfium::new(bindings)),
                });
            }
            Err(err) => errors.push(format!("{}: {}", candidate.display(), err)),
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => {
            info!("bound system pdfium");
            Ok(Engine {
                config: config.clone(),
                pdfium: Arc::new(Pdfium::new(bindings)),
            })
        }
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(EngineError::Bind(errors.join(", ")))
        }
    }
}

/// Library files to try before the system library, most specific first.
/// Directories are expanded to the platform library name inside them.
pub fn library_candidates(config: &EngineConfig, env_path: Option<PathBuf>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for path in config.library_path.iter().cloned().chain(env_path) {
        if path.as_os_str().is_empty() {
            continue;
        }
        if path.is_dir() {
            candidates.push(Pdfium::pdfium_platform_library_name_at_path(&path));
        } else {
            candidates.push(path);
        }
    }
    candidates.push(Pdfium::pdfium_platform_library_name_at_path("./"));
    candidates
}

/// Decodes PDF bytes with the process-wide pdfium binding.
pub struct PdfiumDecoder {
    pdfium: Arc<Pdfium>,
}

impl PdfiumDecoder {
    pub fn new() -> Result<Self, EngineError> {
        let engine = engine()?;
        Ok(Self {
            pdfium: Arc::clone(&engine.pdfium),
        })
    }
}

#[async_trait]
impl DocumentDecoder for PdfiumDecoder {
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    async fn decode(
        &self,
        source: &str,
        bytes: Vec<u8>,
    ) -> Result<Arc<dyn DocumentBackend>, DecodeError> {
        let byte_len = bytes.len();
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(|err| DecodeError::new(format!("pdfium rejected the document: {err}")))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. Both are
        // stored in PdfiumDocument with `document` declared first, so it is
        // dropped before the Arc<Pdfium> it borrows from.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let info = DocumentInfo {
            id: document_id_for_source(source),
            source: source.to_string(),
            page_count: usize::try_from(document.pages().len()).unwrap_or_default(),
            byte_len,
            metadata: read_metadata(&document),
        };
        info!(pages = info.page_count, title = ?info.metadata.title, "decoded pdf");

        Ok(Arc::new(PdfiumDocument {
            document: Mutex::new(document),
            info,
            _pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

struct PdfiumDocument {
    document: Mutex<PdfDocument<'static>>,
    info: DocumentInfo,
    _pdfium: Arc<Pdfium>,
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<PageContent> {
        let document = self.document.lock();
        let page_index = pdf_page_index(request.page_index)?;
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", request.page_index))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let raster: image::RgbaImage = bitmap.as_image().to_rgba8();
        let (width, height) = raster.dimensions();

        let text = match page.text() {
            Ok(text) => text.all(),
            Err(err) => {
                warn!(page = request.page_index, %err, "text extraction failed; page is unsearchable");
                String::new()
            }
        };

        Ok(PageContent {
            image: RenderImage {
                width,
                height,
                pixels: raster.into_raw(),
            },
            text,
        })
    }
}

fn pdf_page_index(page_index: usize) -> Result<PdfPageIndex> {
    PdfPageIndex::try_from(page_index)
        .map_err(|_| anyhow!("page {} is out of supported range", page_index))
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned())
        .filter(|t| !t.trim().is_empty());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned())
        .filter(|a| !a.trim().is_empty());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| split_keywords(t.value()))
        .unwrap_or_default();

    DocumentMetadata {
        title,
        author,
        keywords,
    }
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn keywords_are_split_and_trimmed() {
        assert_eq!(
            split_keywords("thesis, physics;; optics ,"),
            vec!["thesis", "physics", "optics"]
        );
        assert!(split_keywords("  ").is_empty());
    }

    #[test]
    fn page_index_rejects_huge_values() {
        assert!(pdf_page_index(3).is_ok());
        assert!(pdf_page_index(usize::MAX).is_err());
    }

    #[test]
    fn configured_library_is_tried_first() {
        let dir = std::env::temp_dir().join("pageview-render-candidates");
        fs::create_dir_all(&dir).unwrap();
        let config = EngineConfig {
            library_path: Some(dir.clone()),
        };
        let candidates = library_candidates(&config, Some(PathBuf::from("/opt/libpdfium.so")));

        assert_eq!(candidates.len(), 3);
        assert_eq!(
            candidates[0],
            Pdfium::pdfium_platform_library_name_at_path(&dir)
        );
        assert_eq!(candidates[1], PathBuf::from("/opt/libpdfium.so"));
        assert_eq!(
            candidates[2],
            Pdfium::pdfium_platform_library_name_at_path("./")
        );
    }

    #[test]
    fn empty_paths_are_skipped() {
        let config = EngineConfig {
            library_path: Some(PathBuf::new()),
        };
        let candidates = library_candidates(&config, None);
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn garbage_bytes_fail_to_decode() {
        // Needs a pdfium library on the machine.
        let Ok(decoder) = PdfiumDecoder::new() else {
            return;
        };
        let result = decoder
            .decode("https://repo.example/broken.pdf", b"not a pdf".to_vec())
            .await;
        assert!(result.is_err());
    }
}
