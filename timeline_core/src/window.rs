use serde::Serialize;

/// Inclusive index range kept resident around the focus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowState {
    pub start: usize,
    pub end: usize,
}

impl WindowState {
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// Window of `size` frames centred on `focus`, shifted inward at the edges.
///
/// Returns `None` for an empty timeline. A focus past the end is treated as
/// the last frame.
pub fn compute_window(focus: usize, total: usize, size: usize) -> Option<WindowState> {
    let last = total.checked_sub(1)?;
    let size = size.max(1);
    let focus = focus.min(last);
    let left = (size - 1) / 2;
    let right = size - 1 - left;

    let mut start = focus.saturating_sub(left);
    let mut end = focus.saturating_add(right).min(last);

    let span = end - start + 1;
    if span < size {
        let missing = size - span;
        let extend_left = missing.min(start);
        start -= extend_left;
        let extend_right = (missing - extend_left).min(last - end);
        end += extend_right;
    }

    Some(WindowState { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centred_window_in_the_middle() {
        assert_eq!(
            compute_window(50, 200, 11),
            Some(WindowState { start: 45, end: 55 })
        );
        // Even sizes lean right.
        assert_eq!(
            compute_window(50, 200, 4),
            Some(WindowState { start: 49, end: 52 })
        );
    }

    #[test]
    fn window_shifts_away_from_edges() {
        assert_eq!(compute_window(2, 10, 5), Some(WindowState { start: 0, end: 4 }));
        assert_eq!(compute_window(0, 10, 5), Some(WindowState { start: 0, end: 4 }));
        assert_eq!(compute_window(9, 10, 5), Some(WindowState { start: 5, end: 9 }));
    }

    #[test]
    fn short_timelines_cover_everything() {
        assert_eq!(compute_window(1, 3, 120), Some(WindowState { start: 0, end: 2 }));
        assert_eq!(compute_window(0, 1, 5), Some(WindowState { start: 0, end: 0 }));
        assert_eq!(compute_window(0, 0, 5), None);
    }

    #[test]
    fn span_and_containment_hold_for_every_focus() {
        for total in 1..40 {
            for size in 1..15 {
                for focus in 0..total {
                    let window = compute_window(focus, total, size).expect("non-empty");
                    assert_eq!(window.len(), size.min(total), "total={total} size={size}");
                    assert!(window.contains(focus));
                    assert!(window.end < total);
                }
            }
        }
    }

    #[test]
    fn focus_past_end_is_clamped() {
        assert_eq!(compute_window(99, 10, 3), Some(WindowState { start: 7, end: 9 }));
    }
}
