//! Bounded scrollback buffer shared between the output relay and the renderer.
//!
//! The relay task appends complete lines; the render thread reads a window of
//! them. Appending past the retention cap evicts from the head, so the newest
//! output always survives. All access goes through one internal lock, which
//! keeps reads consistent (never a partially appended line).

use std::collections::VecDeque;
use std::sync::Mutex;

/// Lines retained before the oldest are evicted.
pub const DEFAULT_RETENTION_CAP: usize = 5000;

pub struct ScrollbackBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    lines: VecDeque<String>,
    cap: usize,
    /// Total lines ever appended, including evicted ones.
    total: u64,
}

impl ScrollbackBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lines: VecDeque::new(),
                cap: cap.max(1),
                total: 0,
            }),
        }
    }

    /// Append one line at the tail, evicting from the head past the cap.
    pub fn append(&self, line: String) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.lines.push_back(line);
        inner.total += 1;
        while inner.lines.len() > inner.cap {
            inner.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lines
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total lines appended over the buffer's lifetime, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).total
    }

    /// Drop all content (between runs). Does not reset the lifetime total.
    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lines
            .clear();
    }

    /// Largest valid `top_offset` for a window of `height` lines.
    pub fn max_top_offset(&self, height: usize) -> usize {
        self.len().saturating_sub(height)
    }

    /// A window of `height` lines starting at `top_offset`, clamped so the
    /// window never runs past the tail. Pure read; scrolling only changes the
    /// offset the caller passes in.
    pub fn visible_window(&self, top_offset: usize, height: usize) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let top = top_offset.min(inner.lines.len().saturating_sub(height));
        inner
            .lines
            .iter()
            .skip(top)
            .take(height)
            .cloned()
            .collect()
    }

    pub fn last_line(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lines
            .back()
            .cloned()
    }

    /// Full copy of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lines
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order() {
        let buf = ScrollbackBuffer::new(10);
        buf.append("one".to_string());
        buf.append("two".to_string());
        buf.append("three".to_string());
        assert_eq!(buf.snapshot(), vec!["one", "two", "three"]);
    }

    #[test]
    fn eviction_drops_only_the_oldest() {
        let buf = ScrollbackBuffer::new(3);
        for i in 0..5 {
            buf.append(format!("line {}", i));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.snapshot(), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(buf.total_appended(), 5);
    }

    #[test]
    fn visible_window_clamps_offset() {
        let buf = ScrollbackBuffer::new(100);
        for i in 0..10 {
            buf.append(format!("{}", i));
        }
        // Offset way past the end clamps to the last full window
        assert_eq!(buf.visible_window(999, 4), vec!["6", "7", "8", "9"]);
        assert_eq!(buf.visible_window(0, 4), vec!["0", "1", "2", "3"]);
        assert_eq!(buf.max_top_offset(4), 6);
    }

    #[test]
    fn window_larger_than_content() {
        let buf = ScrollbackBuffer::new(100);
        buf.append("only".to_string());
        assert_eq!(buf.visible_window(0, 50), vec!["only"]);
        assert_eq!(buf.max_top_offset(50), 0);
    }

    #[test]
    fn clear_empties_content() {
        let buf = ScrollbackBuffer::new(100);
        buf.append("x".to_string());
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.last_line(), None);
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        use std::sync::Arc;

        let buf = Arc::new(ScrollbackBuffer::new(10_000));
        let mut handles = Vec::new();
        for t in 0..4 {
            let buf = Arc::clone(&buf);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    buf.append(format!("t{} {}", t, i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.len(), 400);
    }
}
