use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use tracing::debug;

use pageview_core::{
    Command, PageStatus, PresentationMode, RenderImage, Rotation, SearchSummary, Surface,
    ViewerPhase,
};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    /// Terminal cells are roughly twice as tall as they are wide.
    const CELL_ASPECT: f32 = 2.0;

    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }

    /// Largest placement that keeps the image's aspect ratio inside the
    /// given area, then scaled by the zoom factor and clamped to the area.
    pub fn fit(image: &RenderImage, area_columns: u32, area_rows: u32, scale: f32) -> Self {
        if image.width == 0 || image.height == 0 {
            return Self::clamped(area_columns, area_rows);
        }
        let area_columns = area_columns.max(1) as f32;
        let area_rows = area_rows.max(1) as f32;
        let aspect = image.width as f32 / image.height as f32;

        let mut columns = area_columns;
        let mut rows = columns / aspect / Self::CELL_ASPECT;
        if rows > area_rows {
            rows = area_rows;
            columns = rows * aspect * Self::CELL_ASPECT;
        }

        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        let columns = (columns * scale).round().min(area_columns);
        let rows = (rows * scale).round().min(area_rows);
        Self::clamped(columns as u32, rows as u32)
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it at the cursor, replacing the
    /// previous placement.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;
        debug!(
            width = image.width,
            height = image.height,
            columns = params.columns,
            rows = params.rows,
            "drawing page"
        );

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every placed image, e.g. when the document goes away.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

const PLACEHOLDER_WIDTH: u32 = 612;
const PLACEHOLDER_HEIGHT: u32 = 792;
const SPREAD_GAP: u32 = 8;

/// Flat grey page shown while a page is pending; darker for failed pages.
pub fn placeholder(width: u32, height: u32, status: PageStatus) -> RenderImage {
    let shade = match status {
        PageStatus::Failed => 96,
        _ => 224,
    };
    let pixel = [shade, shade, shade, 255];
    RenderImage {
        width,
        height,
        pixels: pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect(),
    }
}

fn drawable(surface: &Surface) -> Option<&RenderImage> {
    surface
        .image
        .as_deref()
        .filter(|image| image.width > 0 && image.height > 0)
}

/// Lays the visible surfaces out left to right into one image. Pages
/// without a usable raster get a placeholder sized like their neighbour.
pub fn compose_surfaces(surfaces: &[Surface]) -> Option<RenderImage> {
    if surfaces.is_empty() {
        return None;
    }
    let reference = surfaces
        .iter()
        .find_map(drawable)
        .map(|image| (image.width, image.height))
        .unwrap_or((PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));

    let pages: Vec<RenderImage> = surfaces
        .iter()
        .map(|surface| match drawable(surface) {
            Some(image) => image.clone(),
            None => placeholder(reference.0, reference.1, surface.status),
        })
        .collect();
    if pages.len() == 1 {
        return pages.into_iter().next();
    }

    let gaps = SPREAD_GAP * (pages.len() as u32 - 1);
    let width = pages.iter().map(|page| page.width).sum::<u32>() + gaps;
    let height = pages.iter().map(|page| page.height).max().unwrap_or(0);
    let stride = width as usize * 4;
    let mut pixels = vec![0u8; stride * height as usize];

    let mut x_offset = 0usize;
    for page in &pages {
        let row_len = page.width as usize * 4;
        let rows = page.pixels.chunks_exact(row_len).take(page.height as usize);
        for (row, source) in rows.enumerate() {
            let start = row * stride + x_offset * 4;
            pixels[start..start + row_len].copy_from_slice(source);
        }
        x_offset += (page.width + SPREAD_GAP) as usize;
    }

    Some(RenderImage {
        width,
        height,
        pixels,
    })
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    BeginSearch,
    SearchQueryChanged { query: String },
    SearchSubmit { query: String },
    SearchCancel,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    search_buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.search_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Search => self.map_event_search(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Down, KeyModifiers::NONE)
            | (KeyCode::Right, KeyModifiers::NONE)
            | (KeyCode::Char(' '), KeyModifiers::NONE)
            | (KeyCode::PageDown, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Up, KeyModifiers::NONE)
            | (KeyCode::Left, KeyModifiers::NONE)
            | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                self.reset_count();
                UiEvent::Command(Command::FirstPage)
            }
            (KeyCode::Char('G'), modifiers)
                if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
            {
                // `12G` jumps to page 12, a bare `G` to the last page.
                match self.pending_count.take() {
                    Some(page) => {
                        self.pending_digits.clear();
                        UiEvent::Command(Command::GotoPage {
                            page: page.saturating_sub(1),
                        })
                    }
                    None => UiEvent::Command(Command::LastPage),
                }
            }
            (KeyCode::End, _) => {
                self.reset_count();
                UiEvent::Command(Command::LastPage)
            }
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomIn)
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomOut)
            }
            (KeyCode::Char('='), _) => {
                self.reset_count();
                UiEvent::Command(Command::ResetZoom)
            }
            (KeyCode::Char('r'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::Rotate)
            }
            (KeyCode::Char('f'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::TogglePresentation)
            }
            (KeyCode::Char('/'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Search);
                UiEvent::BeginSearch
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Command(Command::SearchNext { count })
            }
            (KeyCode::Char('N'), modifiers)
                if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
            {
                let count = self.take_count();
                UiEvent::Command(Command::SearchPrev { count })
            }
            (KeyCode::Char('s'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::Download)
            }
            (KeyCode::Char('p'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::Print)
            }
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::Quit
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_event_search(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::SearchCancel
            }
            (KeyCode::Enter, _) => {
                let query = self.search_buffer.clone();
                self.set_mode(InputMode::Normal);
                UiEvent::SearchSubmit { query }
            }
            (KeyCode::Backspace, _) => {
                self.search_buffer.pop();
                UiEvent::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.search_buffer.push(c);
                UiEvent::SearchQueryChanged {
                    query: self.search_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if matches!(self.mode, InputMode::Search) {
            return Some(format!("/{}", self.search_buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

/// Everything the bottom status row shows.
#[derive(Debug, Clone)]
pub struct StatusLine<'a> {
    pub file_name: &'a str,
    pub phase: &'a ViewerPhase,
    pub current_page: usize,
    pub page_count: usize,
    pub settled: usize,
    pub scale: f32,
    pub rotation: Rotation,
    pub presentation: PresentationMode,
    pub search: Option<SearchSummary>,
    pub pending_input: Option<String>,
}

impl StatusLine<'_> {
    pub fn format(&self) -> String {
        let body = match self.phase {
            ViewerPhase::Loading => format!("{}  loading…", self.file_name),
            ViewerPhase::Error(err) => format!("{}  error: {}", self.file_name, err),
            ViewerPhase::Ready => {
                let mut label = format!(
                    "{}  {}/{}  {:.0}%",
                    self.file_name,
                    self.current_page + 1,
                    self.page_count,
                    self.scale * 100.0
                );
                if self.rotation != Rotation::Deg0 {
                    label.push_str(&format!("  {}°", self.rotation.degrees()));
                }
                if self.presentation == PresentationMode::FlipBook {
                    label.push_str("  [book]");
                }
                if self.settled < self.page_count {
                    label.push_str(&format!("  rendering {}/{}", self.settled, self.page_count));
                }
                if let Some(search) = &self.search {
                    let position = search.current_index.map(|i| i + 1).unwrap_or(0);
                    label.push_str(&format!(
                        "  \"{}\" {}/{}",
                        search.query, position, search.total
                    ));
                }
                label
            }
        };
        match &self.pending_input {
            Some(pending) => format!("{body}  {pending}"),
            None => body,
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, row: u16, label: &str) -> io::Result<()> {
    crossterm::queue!(writer, cursor::MoveTo(0, row), Clear(ClearType::CurrentLine))?;
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crossterm::event::{KeyEventKind, KeyEventState};

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = RenderImage {
            width: 1,
            height: 1,
            pixels: vec![255, 0, 0, 255],
        };

        renderer.draw(&image, DrawParams::clamped(10, 5)).unwrap();
        let output = renderer.writer;
        assert_eq!(output[0], 0x1b);
        assert_eq!(output[1], b'_');
        assert_eq!(output[2], b'G');
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("c=10,r=5,s=1,v=1"));
    }

    #[test]
    fn fit_keeps_aspect_and_respects_zoom() {
        let page = placeholder(600, 800, PageStatus::Pending);
        let fitted = DrawParams::fit(&page, 200, 50, 1.0);
        assert_eq!(fitted, DrawParams { columns: 75, rows: 50 });

        let zoomed_out = DrawParams::fit(&page, 200, 50, 0.5);
        assert_eq!(zoomed_out, DrawParams { columns: 38, rows: 25 });

        let zoomed_in = DrawParams::fit(&page, 200, 50, 3.0);
        assert_eq!(zoomed_in, DrawParams { columns: 200, rows: 50 });
    }

    fn surface(page_index: usize, image: Option<RenderImage>, status: PageStatus) -> Surface {
        Surface {
            page_index,
            status,
            image: image.map(Arc::new),
        }
    }

    #[test]
    fn spread_places_pages_side_by_side() {
        let left = RenderImage {
            width: 2,
            height: 1,
            pixels: vec![1, 1, 1, 255, 2, 2, 2, 255],
        };
        let composed = compose_surfaces(&[
            surface(1, Some(left), PageStatus::Rendered),
            surface(2, None, PageStatus::Pending),
        ])
        .unwrap();

        assert_eq!(composed.width, 2 + SPREAD_GAP + 2);
        assert_eq!(composed.height, 1);
        assert_eq!(&composed.pixels[..8], &[1, 1, 1, 255, 2, 2, 2, 255]);
        let right_start = (2 + SPREAD_GAP as usize) * 4;
        assert_eq!(&composed.pixels[right_start..right_start + 4], &[224, 224, 224, 255]);
    }

    #[test]
    fn failed_single_page_gets_placeholder() {
        let composed = compose_surfaces(&[surface(0, None, PageStatus::Failed)]).unwrap();
        assert_eq!(
            (composed.width, composed.height),
            (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT)
        );
        assert_eq!(&composed.pixels[..4], &[96, 96, 96, 255]);
        assert!(compose_surfaces(&[]).is_none());
    }

    #[test]
    fn empty_raster_in_spread_is_replaced() {
        let empty = RenderImage {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
        let right = RenderImage {
            width: 2,
            height: 1,
            pixels: vec![5, 5, 5, 255, 6, 6, 6, 255],
        };
        let composed = compose_surfaces(&[
            surface(3, Some(empty), PageStatus::Rendered),
            surface(4, Some(right), PageStatus::Rendered),
        ])
        .unwrap();

        assert_eq!(composed.width, 2 + SPREAD_GAP + 2);
        assert_eq!(&composed.pixels[..4], &[224, 224, 224, 255]);
        let right_start = (2 + SPREAD_GAP as usize) * 4;
        assert_eq!(
            &composed.pixels[right_start..right_start + 8],
            &[5, 5, 5, 255, 6, 6, 6, 255]
        );
    }

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn event_mapper_uses_numeric_prefix_for_next_page() {
        let mut mapper = EventMapper::new();
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('1'))),
            UiEvent::None
        ));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('2'))),
            UiEvent::None
        ));
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        match mapper.map_event(key_event(KeyCode::Char('j'))) {
            UiEvent::Command(Command::NextPage { count }) => assert_eq!(count, 12),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn event_mapper_prefix_before_g_jumps_to_page() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('7')));
        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('G'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::GotoPage { page }) => assert_eq!(page, 6),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('G'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::LastPage) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('g'))),
            UiEvent::Command(Command::FirstPage)
        ));
    }

    #[test]
    fn event_mapper_drops_prefix_on_other_command() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('r'))),
            UiEvent::Command(Command::Rotate)
        ));

        match mapper.map_event(key_event(KeyCode::Char('k'))) {
            UiEvent::Command(Command::PrevPage { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_maps_view_and_host_keys() {
        let mut mapper = EventMapper::new();
        let cases = [
            ('+', "ZoomIn"),
            ('-', "ZoomOut"),
            ('=', "ResetZoom"),
            ('f', "TogglePresentation"),
            ('s', "Download"),
            ('p', "Print"),
        ];
        for (key, expected) in cases {
            match mapper.map_event(key_event(KeyCode::Char(key))) {
                UiEvent::Command(command) => {
                    assert!(format!("{:?}", command).starts_with(expected))
                }
                other => panic!("unexpected event for {key}: {:?}", other),
            }
        }
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('q'))),
            UiEvent::Quit
        ));
    }

    #[test]
    fn event_mapper_maps_n_and_uppercase_n_to_search_navigation() {
        let mut mapper = EventMapper::new();

        match mapper.map_event(key_event(KeyCode::Char('n'))) {
            UiEvent::Command(Command::SearchNext { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }

        match mapper.map_event(key_event_with_modifiers(
            KeyCode::Char('N'),
            KeyModifiers::SHIFT,
        )) {
            UiEvent::Command(Command::SearchPrev { count }) => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }

        mapper.map_event(key_event(KeyCode::Char('3')));
        match mapper.map_event(key_event(KeyCode::Char('n'))) {
            UiEvent::Command(Command::SearchNext { count }) => assert_eq!(count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn event_mapper_slash_enters_search_mode_and_collects_input() {
        let mut mapper = EventMapper::new();

        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Char('/'))),
            UiEvent::BeginSearch
        ));
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));

        match mapper.map_event(key_event(KeyCode::Char('f'))) {
            UiEvent::SearchQueryChanged { ref query } => assert_eq!(query, "f"),
            other => panic!("unexpected event: {:?}", other),
        }
        match mapper.map_event(key_event(KeyCode::Backspace)) {
            UiEvent::SearchQueryChanged { ref query } => assert!(query.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }
        mapper.map_event(key_event(KeyCode::Char('g')));

        match mapper.map_event(key_event(KeyCode::Enter)) {
            UiEvent::SearchSubmit { ref query } => assert_eq!(query, "g"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn event_mapper_escape_cancels_search() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('/')));
        mapper.map_event(key_event(KeyCode::Char('x')));
        assert!(matches!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::SearchCancel
        ));
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn status_line_reports_progress_and_search() {
        let phase = ViewerPhase::Ready;
        let status = StatusLine {
            file_name: "thesis.pdf",
            phase: &phase,
            current_page: 4,
            page_count: 10,
            settled: 6,
            scale: 1.25,
            rotation: Rotation::Deg90,
            presentation: PresentationMode::FlipBook,
            search: Some(SearchSummary {
                query: "optics".into(),
                total: 3,
                current_index: Some(1),
            }),
            pending_input: None,
        };
        assert_eq!(
            status.format(),
            "thesis.pdf  5/10  125%  90°  [book]  rendering 6/10  \"optics\" 2/3"
        );
    }

    #[test]
    fn status_line_shows_load_errors() {
        let phase = ViewerPhase::Error(pageview_core::LoadError::Fetch(
            pageview_core::FetchError::Auth {
                location: "https://repo.example/a.pdf".into(),
                status: 401,
            },
        ));
        let status = StatusLine {
            file_name: "a.pdf",
            phase: &phase,
            current_page: 0,
            page_count: 0,
            settled: 0,
            scale: 1.0,
            rotation: Rotation::Deg0,
            presentation: PresentationMode::SinglePage,
            search: None,
            pending_input: None,
        };
        assert!(status.format().contains("HTTP 401"));
    }
}
