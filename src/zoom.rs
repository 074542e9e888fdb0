//! Zoom state and scroll-position preservation across relayouts

/// Zoom factor with configurable bounds and step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Zoom {
    /// Current zoom factor (1.0 = 100%)
    pub factor: f32,
    pub min: f32,
    pub max: f32,
    /// Multiplier applied per zoom-in step
    pub step: f32,
}

impl Default for Zoom {
    fn default() -> Self {
        Self {
            factor: 1.0,
            min: 0.3,
            max: 5.0,
            step: 1.25,
        }
    }
}

impl Zoom {
    #[must_use]
    pub fn new(factor: f32, min: f32, max: f32, step: f32) -> Self {
        let mut zoom = Self {
            factor: 1.0,
            min,
            max: max.max(min),
            step,
        };
        zoom.factor = zoom.clamp_factor(factor);
        zoom
    }

    /// Clamp factor to valid range, handling NaN/Inf
    #[must_use]
    pub fn clamp_factor(&self, factor: f32) -> f32 {
        if factor.is_finite() {
            factor.clamp(self.min, self.max)
        } else {
            1.0_f32.clamp(self.min, self.max)
        }
    }

    /// Set a new factor, returning whether it changed
    pub fn set(&mut self, factor: f32) -> bool {
        let clamped = self.clamp_factor(factor);
        if (self.factor - clamped).abs() > f32::EPSILON {
            self.factor = clamped;
            true
        } else {
            false
        }
    }

    /// Factor one zoom-in step away
    #[must_use]
    pub fn stepped_in(&self) -> f32 {
        self.clamp_factor(self.factor * self.step)
    }

    /// Factor one zoom-out step away
    #[must_use]
    pub fn stepped_out(&self) -> f32 {
        self.clamp_factor(self.factor / self.step)
    }
}

/// Scroll position expressed as a fraction of the scrollable range, so it
/// survives a change of total content height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScrollAnchor {
    pub fraction: f32,
}

impl ScrollAnchor {
    #[must_use]
    pub fn capture(scroll_top: f32, total_height: f32, viewport_height: f32) -> Self {
        let range = total_height - viewport_height;
        let fraction = if range > 0.0 {
            (scroll_top / range).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { fraction }
    }

    /// Equivalent scroll offset for the new content height
    #[must_use]
    pub fn restore(&self, total_height: f32, viewport_height: f32) -> f32 {
        (total_height - viewport_height).max(0.0) * self.fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_is_clamped() {
        let mut zoom = Zoom::default();
        assert!(zoom.set(10.0));
        assert_eq!(zoom.factor, 5.0);
        assert!(zoom.set(0.01));
        assert_eq!(zoom.factor, 0.3);
        assert!(zoom.set(f32::NAN));
        assert_eq!(zoom.factor, 1.0);
        assert!(!zoom.set(1.0));
    }

    #[test]
    fn steps_multiply_and_divide() {
        let zoom = Zoom::default();
        assert!((zoom.stepped_in() - 1.25).abs() < 1e-6);
        assert!((zoom.stepped_out() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn anchor_restores_fraction() {
        let anchor = ScrollAnchor::capture(450.0, 1000.0, 100.0);
        assert!((anchor.fraction - 0.5).abs() < 1e-6);
        assert!((anchor.restore(2100.0, 100.0) - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn anchor_without_range_is_top() {
        let anchor = ScrollAnchor::capture(0.0, 50.0, 100.0);
        assert_eq!(anchor.fraction, 0.0);
        assert_eq!(anchor.restore(5000.0, 100.0), 0.0);
    }
}
