//! Visible/invisible classification of pages against the scroll window.

use crate::layout::LayoutEngine;

/// Interval along one scroll axis, `upper = lower + extent`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollWindow {
    pub lower: f64,
    pub upper: f64,
}

impl ScrollWindow {
    pub fn new(value: f64, extent: f64) -> Self {
        Self {
            lower: value,
            upper: value + extent.max(0.0),
        }
    }

    pub fn extent(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn centre(&self) -> f64 {
        self.lower + self.extent() / 2.0
    }
}

/// How a page extent `[begin, end]` meets a scroll window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// Whole page inside the window.
    Contained,
    /// Page starts above the window and ends inside it.
    TrailingEdge,
    /// Page starts inside the window and ends below it.
    LeadingEdge,
    /// Page is taller than the window and covers all of it.
    Spanning,
}

pub fn overlap(begin: f64, end: f64, window: ScrollWindow) -> Option<Overlap> {
    let ScrollWindow { lower, upper } = window;
    if begin >= lower && end <= upper {
        Some(Overlap::Contained)
    } else if begin <= lower && end >= lower && end <= upper {
        Some(Overlap::TrailingEdge)
    } else if begin >= lower && end >= upper && begin <= upper {
        Some(Overlap::LeadingEdge)
    } else if begin < lower && end > upper {
        Some(Overlap::Spanning)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub vertical: ScrollWindow,
    /// Only set when the host scrolls horizontally as well.
    pub horizontal: Option<ScrollWindow>,
}

impl Viewport {
    pub fn vertical(window: ScrollWindow) -> Self {
        Self {
            vertical: window,
            horizontal: None,
        }
    }
}

/// Result of one classification pass, indexed by page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pages: Vec<Option<Overlap>>,
    focus: Option<usize>,
}

impl Classification {
    pub fn is_visible(&self, page: usize) -> bool {
        matches!(self.pages.get(page), Some(Some(_)))
    }

    pub fn overlap(&self, page: usize) -> Option<Overlap> {
        self.pages.get(page).copied().flatten()
    }

    pub fn visible_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages
            .iter()
            .enumerate()
            .filter_map(|(page, overlap)| overlap.map(|_| page))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Visible page covering the vertical centre of the window, or the first
    /// visible page when the centre falls into padding.
    pub fn focus_page(&self) -> Option<usize> {
        self.focus
    }

    /// Everything invisible, for when no layout exists yet.
    pub fn hidden(page_count: usize) -> Self {
        Self {
            pages: vec![None; page_count],
            focus: None,
        }
    }
}

pub struct ViewportClassifier;

impl ViewportClassifier {
    pub fn classify(engine: &LayoutEngine<'_>, viewport: &Viewport) -> Classification {
        let mut pages = Vec::with_capacity(engine.page_count());
        let mut centred = None;
        let centre = viewport.vertical.centre();

        for index in 0..engine.page_count() {
            let Some(bounds) = engine.bounds(index) else {
                pages.push(None);
                continue;
            };

            let vertical = overlap(bounds.offset.y, bounds.bottom(), viewport.vertical);
            let horizontal_ok = viewport.horizontal.map_or(true, |window| {
                overlap(bounds.offset.x, bounds.right(), window).is_some()
            });
            let state = vertical.filter(|_| horizontal_ok);

            if state.is_some()
                && centred.is_none()
                && bounds.offset.y <= centre
                && centre <= bounds.bottom()
            {
                centred = Some(index);
            }
            pages.push(state);
        }

        let focus = centred.or_else(|| pages.iter().position(Option::is_some));
        Classification { pages, focus }
    }
}
