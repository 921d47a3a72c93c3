//! Scroll geometry and edge-trigger gates.
//!
//! The engine has no layout; hosts report [`ScrollMetrics`] and apply the
//! scroll directives it emits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn distance_to_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    pub fn near_top(&self, threshold: f64) -> bool {
        self.scroll_top <= threshold
    }

    pub fn near_bottom(&self, threshold: f64) -> bool {
        self.distance_to_bottom() <= threshold
    }
}

/// Captured before content is inserted above the viewport.
///
/// After the host lays out the new content it calls [`ScrollAnchor::restore`]
/// with the new scroll height to keep the same records under the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollAnchor {
    pub scroll_top: f64,
    pub scroll_height: f64,
}

impl ScrollAnchor {
    pub fn capture(metrics: &ScrollMetrics) -> Self {
        Self {
            scroll_top: metrics.scroll_top,
            scroll_height: metrics.scroll_height,
        }
    }

    pub fn restore(&self, new_scroll_height: f64) -> f64 {
        self.scroll_top + (new_scroll_height - self.scroll_height)
    }
}

/// Edge trigger: fires once on entering the edge zone, re-arms only after
/// the viewport has left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeGate {
    armed: bool,
}

impl EdgeGate {
    pub fn new() -> Self {
        Self { armed: true }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Feed the current edge state. Returns true when a fetch should fire.
    ///
    /// Leaving the edge re-arms the gate. At the edge, the gate fires only if
    /// it is armed and `ready` (nothing in flight, more data available); firing
    /// disarms it until the viewport leaves the edge again.
    pub fn check(&mut self, at_edge: bool, ready: bool) -> bool {
        if !at_edge {
            self.armed = true;
            return false;
        }
        if self.armed && ready {
            self.armed = false;
            return true;
        }
        false
    }

    pub fn rearm(&mut self) {
        self.armed = true;
    }
}

impl Default for EdgeGate {
    fn default() -> Self {
        Self::new()
    }
}
