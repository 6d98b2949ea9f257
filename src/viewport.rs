//! Scroll-driven continuation. The trigger watches one sentinel, the last
//! rendered record, and asks the controller for the next page when that
//! sentinel scrolls into view.

use tracing::debug;

use crate::canonical::Keyed;
use crate::pagination::PaginationController;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Fires as soon as any part of the sentinel is visible.
    AnyOverlap,
    /// Fires once at least this fraction of the sentinel is visible.
    Ratio(f32),
}

impl Threshold {
    pub const SEARCH: Threshold = Threshold::Ratio(0.5);
    pub const FEED: Threshold = Threshold::AnyOverlap;

    fn is_met(self, ratio: f32) -> bool {
        match self {
            Threshold::AnyOverlap => ratio > 0.0,
            Threshold::Ratio(min) => ratio > 0.0 && ratio >= min,
        }
    }
}

/// Fraction of an item that lies inside the viewport, in `0.0..=1.0`.
pub fn visible_ratio(
    item_top: f32,
    item_height: f32,
    viewport_top: f32,
    viewport_height: f32,
) -> f32 {
    if item_height <= 0.0 || viewport_height <= 0.0 {
        return 0.0;
    }
    let top = item_top.max(viewport_top);
    let bottom = (item_top + item_height).min(viewport_top + viewport_height);
    ((bottom - top).max(0.0) / item_height).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct ViewportTrigger {
    threshold: Threshold,
    bound: Option<String>,
    visible: bool,
    attached: bool,
}

impl ViewportTrigger {
    pub fn new(threshold: Threshold) -> Self {
        Self {
            threshold,
            bound: None,
            visible: false,
            attached: true,
        }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn bound(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    /// Points the trigger at a new sentinel. Rebinding to a different
    /// identity re-arms it; rebinding to the same one is a no-op.
    pub fn bind(&mut self, sentinel: Option<&str>) {
        if self.bound.as_deref() == sentinel {
            return;
        }
        self.bound = sentinel.map(str::to_string);
        self.visible = false;
    }

    /// Records a visibility sample and reports whether it is a rising edge.
    /// Samples for anything but the bound sentinel are ignored.
    pub fn observe(&mut self, sentinel: &str, ratio: f32) -> bool {
        if !self.attached || self.bound.as_deref() != Some(sentinel) {
            return false;
        }
        let now_visible = self.threshold.is_met(ratio);
        let rising = now_visible && !self.visible;
        self.visible = now_visible;
        rising
    }

    /// Feeds a sample and, on a rising edge, asks `controller` for the next
    /// page. The edge is consumed even when the controller is busy or out of
    /// pages; the sentinel has to leave and re-enter view to fire again.
    pub fn check<T>(
        &mut self,
        controller: &mut PaginationController<T>,
        sentinel: &str,
        ratio: f32,
    ) -> bool
    where
        T: Keyed + Send + 'static,
    {
        if !self.observe(sentinel, ratio) {
            return false;
        }
        let state = controller.state();
        if !state.has_more() || state.is_loading() {
            debug!(
                sentinel,
                has_more = state.has_more(),
                loading = state.is_loading(),
                "sentinel visible, not loading"
            );
            return false;
        }
        controller.load_more()
    }

    /// Reconnects a detached trigger. It starts unbound and unarmed, as a
    /// freshly mounted one would.
    pub fn attach(&mut self) {
        if self.attached {
            return;
        }
        self.attached = true;
        self.bound = None;
        self.visible = false;
    }

    pub fn detach(&mut self) {
        self.attached = false;
        self.bound = None;
        self.visible = false;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}
