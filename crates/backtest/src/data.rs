//! Bar series view.
//!
//! Holds the full bar history but only exposes the prefix revealed so far,
//! so strategies and the broker never see bars from the future.

use barsim_core::{Bar, PriceField};

/// Growing view over an immutable bar series.
#[derive(Debug, Clone)]
pub struct Data {
    bars: Vec<Bar>,
    visible: usize,
}

impl Data {
    /// Create a view with no bar revealed yet.
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars, visible: 0 }
    }

    /// Reveal the next bar. Returns false once the series is exhausted.
    pub fn advance(&mut self) -> bool {
        if self.visible < self.bars.len() {
            self.visible += 1;
            true
        } else {
            false
        }
    }

    /// Bars revealed so far.
    pub fn bars(&self) -> &[Bar] {
        &self.bars[..self.visible]
    }

    /// Total length of the underlying series.
    pub fn total_len(&self) -> usize {
        self.bars.len()
    }

    /// Number of revealed bars.
    pub fn len(&self) -> usize {
        self.visible
    }

    pub fn is_empty(&self) -> bool {
        self.visible == 0
    }

    pub fn first_bar(&self) -> Option<&Bar> {
        self.bars().first()
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars().last()
    }

    pub fn first_close(&self) -> Option<f64> {
        self.first_bar().map(|b| b.close)
    }

    pub fn last_close(&self) -> Option<f64> {
        self.last_bar().map(|b| b.close)
    }

    /// Bar at index, negative indexes count back from the latest bar.
    ///
    /// `bar_at(0)` is the first bar, `bar_at(-1)` the latest one.
    pub fn bar_at(&self, i: isize) -> Option<&Bar> {
        let idx = if i < 0 {
            self.visible.checked_sub(i.unsigned_abs())?
        } else {
            i as usize
        };
        self.bars().get(idx)
    }

    /// One price series over the revealed bars.
    pub fn prices(&self, field: PriceField) -> Vec<f64> {
        self.bars().iter().map(|b| b.price(field)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bars() -> Vec<Bar> {
        vec![
            Bar::new(0, 10.0, 11.0, 9.0, 10.5),
            Bar::new(60_000, 10.5, 12.0, 10.0, 11.5),
            Bar::new(120_000, 11.5, 13.0, 11.0, 12.5),
        ]
    }

    #[test]
    fn test_prefix_only() {
        let mut data = Data::new(make_bars());
        assert!(data.is_empty());
        assert!(data.last_bar().is_none());

        data.advance();
        data.advance();
        assert_eq!(data.len(), 2);
        assert_eq!(data.total_len(), 3);
        assert_eq!(data.last_close(), Some(11.5));
        assert_eq!(data.prices(PriceField::Close), vec![10.5, 11.5]);
    }

    #[test]
    fn test_bar_at_negative() {
        let mut data = Data::new(make_bars());
        while data.advance() {}
        assert_eq!(data.bar_at(-1).map(|b| b.close), Some(12.5));
        assert_eq!(data.bar_at(-3).map(|b| b.close), Some(10.5));
        assert!(data.bar_at(-4).is_none());
        assert_eq!(data.bar_at(1).map(|b| b.open), Some(10.5));
        assert!(!data.advance());
    }
}
