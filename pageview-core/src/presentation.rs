//! Presentation adapters: how many surfaces are shown at once and how
//! navigation steps between them.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::ZoomConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomBounds {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl ZoomBounds {
    pub const fn new(min: f32, max: f32, step: f32) -> Self {
        Self { min, max, step }
    }

    pub fn clamp(&self, scale: f32) -> f32 {
        if !scale.is_finite() {
            return self.min.max(1.0f32.min(self.max));
        }
        scale.clamp(self.min, self.max)
    }

    pub fn zoom_in(&self, scale: f32) -> f32 {
        self.clamp(scale + self.step)
    }

    pub fn zoom_out(&self, scale: f32) -> f32 {
        self.clamp(scale - self.step)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.step.is_finite()) {
            bail!("zoom bounds must be finite");
        }
        if self.min <= 0.0 || self.min > self.max {
            bail!("zoom bounds need 0 < min <= max (got {}..{})", self.min, self.max);
        }
        if self.step <= 0.0 {
            bail!("zoom step must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresentationMode {
    #[default]
    SinglePage,
    FlipBook,
}

impl PresentationMode {
    pub fn toggled(self) -> Self {
        match self {
            PresentationMode::SinglePage => PresentationMode::FlipBook,
            PresentationMode::FlipBook => PresentationMode::SinglePage,
        }
    }
}

pub trait Presentation: Send + Sync {
    fn mode(&self) -> PresentationMode;
    fn zoom_bounds(&self) -> ZoomBounds;
    /// Pages on screen when `current` is the current page.
    fn visible_pages(&self, current: usize, page_count: usize) -> Vec<usize>;
    /// Page reached by one forward step; `current` when already at the end.
    fn next_page(&self, current: usize, page_count: usize) -> usize;
    fn previous_page(&self, current: usize) -> usize;
}

pub fn presentation_for(mode: PresentationMode, zoom: &ZoomConfig) -> Box<dyn Presentation> {
    match mode {
        PresentationMode::SinglePage => Box::new(SinglePage {
            bounds: zoom.single_page,
        }),
        PresentationMode::FlipBook => Box::new(FlipBook {
            bounds: zoom.flip_book,
        }),
    }
}

pub struct SinglePage {
    bounds: ZoomBounds,
}

impl Presentation for SinglePage {
    fn mode(&self) -> PresentationMode {
        PresentationMode::SinglePage
    }

    fn zoom_bounds(&self) -> ZoomBounds {
        self.bounds
    }

    fn visible_pages(&self, current: usize, page_count: usize) -> Vec<usize> {
        if current < page_count {
            vec![current]
        } else {
            Vec::new()
        }
    }

    fn next_page(&self, current: usize, page_count: usize) -> usize {
        if current + 1 < page_count {
            current + 1
        } else {
            current
        }
    }

    fn previous_page(&self, current: usize) -> usize {
        current.saturating_sub(1)
    }
}

/// Book layout: the cover stands alone, then pages pair up as 1-2, 3-4, ...
pub struct FlipBook {
    bounds: ZoomBounds,
}

impl FlipBook {
    fn spread_start(page: usize) -> usize {
        if page == 0 || page % 2 == 1 {
            page
        } else {
            page - 1
        }
    }
}

impl Presentation for FlipBook {
    fn mode(&self) -> PresentationMode {
        PresentationMode::FlipBook
    }

    fn zoom_bounds(&self) -> ZoomBounds {
        self.bounds
    }

    fn visible_pages(&self, current: usize, page_count: usize) -> Vec<usize> {
        if current >= page_count {
            return Vec::new();
        }
        let start = Self::spread_start(current);
        if start == 0 {
            return vec![0];
        }
        (start..(start + 2).min(page_count)).collect()
    }

    fn next_page(&self, current: usize, page_count: usize) -> usize {
        let start = Self::spread_start(current);
        let next = if start == 0 { 1 } else { start + 2 };
        if next < page_count {
            next
        } else {
            current
        }
    }

    fn previous_page(&self, current: usize) -> usize {
        match Self::spread_start(current) {
            0 | 1 => 0,
            start => start - 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip() -> Box<dyn Presentation> {
        presentation_for(PresentationMode::FlipBook, &ZoomConfig::default())
    }

    fn single() -> Box<dyn Presentation> {
        presentation_for(PresentationMode::SinglePage, &ZoomConfig::default())
    }

    #[test]
    fn zoom_never_leaves_bounds() {
        let bounds = ZoomBounds::new(0.5, 3.0, 0.25);
        let mut scale = 1.0;
        for _ in 0..100 {
            scale = bounds.zoom_in(scale);
            assert!(scale <= 3.0);
        }
        assert_eq!(scale, 3.0);
        for _ in 0..100 {
            scale = bounds.zoom_out(scale);
            assert!(scale >= 0.5);
        }
        assert_eq!(scale, 0.5);
        assert_eq!(bounds.clamp(f32::NAN), 1.0);
    }

    #[test]
    fn single_page_steps_one_at_a_time_without_wrapping() {
        let presentation = single();
        assert_eq!(presentation.visible_pages(3, 10), vec![3]);
        assert_eq!(presentation.next_page(3, 10), 4);
        assert_eq!(presentation.next_page(9, 10), 9);
        assert_eq!(presentation.previous_page(0), 0);
    }

    #[test]
    fn flip_book_shows_cover_then_pairs() {
        let presentation = flip();
        assert_eq!(presentation.visible_pages(0, 10), vec![0]);
        assert_eq!(presentation.visible_pages(1, 10), vec![1, 2]);
        assert_eq!(presentation.visible_pages(2, 10), vec![1, 2]);
        assert_eq!(presentation.visible_pages(9, 10), vec![9]);
        assert_eq!(presentation.visible_pages(7, 9), vec![7, 8]);
    }

    #[test]
    fn flip_book_navigation_moves_by_spread() {
        let presentation = flip();
        assert_eq!(presentation.next_page(0, 10), 1);
        assert_eq!(presentation.next_page(2, 10), 3);
        assert_eq!(presentation.next_page(9, 10), 9);
        assert_eq!(presentation.previous_page(4), 1);
        assert_eq!(presentation.previous_page(2), 0);
        assert_eq!(presentation.previous_page(0), 0);
    }

    #[test]
    fn flip_book_allows_a_wider_zoom_range() {
        assert!(flip().zoom_bounds().max > single().zoom_bounds().max);
        assert!(flip().zoom_bounds().min < single().zoom_bounds().min);
    }
}
