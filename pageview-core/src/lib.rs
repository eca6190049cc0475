use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod cache;
pub mod config;
pub mod error;
pub mod presentation;
pub mod scheduler;
pub mod search;
pub mod state;
pub mod viewer;

pub use cache::{Generation, GenerationCounter, PageCache, PageRecord, PageSnapshot, PageStatus, SharedPageCache};
pub use config::ViewerConfig;
pub use error::{DecodeError, FetchError, LoadError, PageCacheError, PageRenderError};
pub use presentation::{PresentationMode, ZoomBounds};
pub use scheduler::{IncrementalScheduler, RenderJob, ScheduleReport};
pub use search::{SearchMatch, SearchSession, SearchSummary};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
pub use viewer::{Command, HostRequest, Surface, Viewer, ViewerEvent, ViewerPhase, ViewerState};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f1d7c2e-5b8a-5e64-9c0d-8a41e6b27f93").expect("valid namespace UUID")
});

/// Stable identifier for a document source. Remote sources hash their URL
/// verbatim; local paths are resolved first so `./a.pdf` and its absolute
/// form map to the same id.
pub fn document_id_for_source(source: &str) -> DocumentId {
    let source = source.trim();
    if is_remote_source(source) {
        return Uuid::new_v5(&DOCUMENT_NAMESPACE, source.as_bytes());
    }

    let path = Path::new(source.strip_prefix("file://").unwrap_or(source));
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

pub fn is_remote_source(source: &str) -> bool {
    let lower = source.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub source: String,
    pub page_count: usize,
    pub byte_len: usize,
    pub metadata: DocumentMetadata,
}

impl DocumentInfo {
    /// Last path segment of the source, used for downloads and the status line.
    pub fn file_name(&self) -> String {
        let trimmed = self
            .source
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');
        trimmed
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("document.pdf")
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
        }
    }
}

/// RGBA8 raster of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn rotated(&self, rotation: Rotation) -> RenderImage {
        let width = self.width as usize;
        let height = self.height as usize;
        if rotation == Rotation::Deg0 || width == 0 || height == 0 {
            return self.clone();
        }

        let (out_width, out_height) = match rotation {
            Rotation::Deg90 | Rotation::Deg270 => (height, width),
            _ => (width, height),
        };
        let mut pixels = vec![0u8; self.pixels.len()];

        for y in 0..height {
            for x in 0..width {
                let (dx, dy) = match rotation {
                    Rotation::Deg90 => (height - 1 - y, x),
                    Rotation::Deg180 => (width - 1 - x, height - 1 - y),
                    Rotation::Deg270 => (y, width - 1 - x),
                    Rotation::Deg0 => (x, y),
                };
                let src = (y * width + x) * 4;
                let dst = (dy * out_width + dx) * 4;
                pixels[dst..dst + 4].copy_from_slice(&self.pixels[src..src + 4]);
            }
        }

        RenderImage {
            width: out_width as u32,
            height: out_height as u32,
            pixels,
        }
    }
}

/// Raster plus extracted text produced for a single page.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub image: RenderImage,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn next(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Bearer token handed over by the host's credential store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A decoded document. Implementations serialise access to the underlying
/// engine themselves; callers never render two pages of one backend at once.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn render_page(&self, request: RenderRequest) -> Result<PageContent>;
}

#[async_trait::async_trait]
pub trait DocumentDecoder: Send + Sync {
    /// Takes ownership of `bytes`; engines may consume the buffer.
    async fn decode(&self, source: &str, bytes: Vec<u8>)
        -> Result<Arc<dyn DocumentBackend>, DecodeError>;
}

#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, source: &str, credential: Option<&Credential>) -> Result<Bytes, FetchError>;
}
