use crate::types::{PingLine, WaterfallError};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A stored line together with its current buffer row
#[derive(Debug, Clone)]
pub struct PlacedLine {
    pub line: Arc<PingLine>,
    /// Top buffer row of this line (0 is the newest edge)
    pub y_pos: i64,
}

impl PlacedLine {
    /// Whether buffer row `y` falls inside this line's rows
    pub fn contains_row(&self, y: i64) -> bool {
        y >= self.y_pos && y < self.y_pos + self.line.y_size as i64
    }

    /// Last buffer row (exclusive) covered by this line
    pub fn y_end(&self) -> i64 {
        self.y_pos + self.line.y_size as i64
    }
}

impl Deref for PlacedLine {
    type Target = PingLine;

    fn deref(&self) -> &PingLine {
        &self.line
    }
}

#[derive(Debug)]
struct StoredLine {
    line: Arc<PingLine>,
    /// Value of `scrolled` minus this line's row at placement time
    anchor: i64,
}

#[derive(Debug, Default)]
struct Inner {
    /// Oldest first
    lines: VecDeque<StoredLine>,
    scrolled: i64,
}

impl Inner {
    fn place(&self, stored: &StoredLine) -> PlacedLine {
        PlacedLine {
            line: Arc::clone(&stored.line),
            y_pos: self.scrolled - stored.anchor,
        }
    }
}

/// Outcome of committing a composited batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchCommit {
    pub inserted: usize,
    /// Lines refused because their timestamp did not advance the store
    pub rejected: usize,
    pub evicted: usize,
}

/// Ordered, thread-safe collection of visible ping lines
///
/// Lines are frozen (`Arc<PingLine>`) once composited. The store keeps a running
/// count of scrolled rows and each line remembers the count at which it was
/// placed, so `y_pos` is derived and scrolling the whole store is one addition.
#[derive(Debug, Default)]
pub struct LineStore {
    inner: RwLock<Inner>,
}

impl LineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scroll existing lines by `total_shift` rows, append the batch and evict
    /// whatever now lies at or beyond row `height`, all under one write lock.
    ///
    /// `batch` is oldest first, each paired with its row after the scroll.
    pub fn commit_batch(&self, batch: Vec<(PingLine, i64)>, total_shift: u32, height: usize) -> BatchCommit {
        let mut inner = self.write();
        let mut commit = BatchCommit::default();

        inner.scrolled += total_shift as i64;

        for (line, y_pos) in batch {
            let newest = inner.lines.back().map(|s| s.line.timestamp_ms);
            if let Some(newest) = newest {
                if line.timestamp_ms <= newest {
                    let err = WaterfallError::DuplicateTimestamp {
                        timestamp_ms: line.timestamp_ms,
                    };
                    log::debug!("Dropping line: {}", err);
                    commit.rejected += 1;
                    continue;
                }
            }
            let anchor = inner.scrolled - y_pos;
            inner.lines.push_back(StoredLine {
                line: Arc::new(line),
                anchor,
            });
            commit.inserted += 1;
        }

        while let Some(front) = inner.lines.front() {
            if inner.scrolled - front.anchor >= height as i64 {
                inner.lines.pop_front();
                commit.evicted += 1;
            } else {
                break;
            }
        }

        commit
    }

    /// Copy-on-read view of every stored line, oldest first
    pub fn snapshot(&self) -> Vec<PlacedLine> {
        let inner = self.read();
        inner.lines.iter().map(|s| inner.place(s)).collect()
    }

    /// Lines with `start_ts <= timestamp <= end_ts`, oldest first
    pub fn lines_between(&self, start_ts: i64, end_ts: i64) -> Vec<PlacedLine> {
        let inner = self.read();
        inner
            .lines
            .iter()
            .filter(|s| s.line.timestamp_ms >= start_ts && s.line.timestamp_ms <= end_ts)
            .map(|s| inner.place(s))
            .collect()
    }

    /// Line covering buffer row `y`
    pub fn line_at_row(&self, y: i64) -> Option<PlacedLine> {
        let inner = self.read();
        inner
            .lines
            .iter()
            .map(|s| inner.place(s))
            .find(|p| p.contains_row(y))
    }

    /// Lines intersecting rows `[y_start, y_end)`, top of the buffer first
    pub fn rows_between(&self, y_start: i64, y_end: i64) -> Vec<PlacedLine> {
        let inner = self.read();
        inner
            .lines
            .iter()
            .rev()
            .map(|s| inner.place(s))
            .filter(|p| p.y_end() > y_start && p.y_pos < y_end)
            .collect()
    }

    /// Two temporally adjacent lines with `older.ts <= ts <= newer.ts`
    pub fn bracketing_pair(&self, timestamp_ms: i64) -> Option<(PlacedLine, PlacedLine)> {
        let inner = self.read();
        let lines = &inner.lines;
        (1..lines.len())
            .find(|&i| {
                lines[i - 1].line.timestamp_ms <= timestamp_ms && timestamp_ms <= lines[i].line.timestamp_ms
            })
            .map(|i| (inner.place(&lines[i - 1]), inner.place(&lines[i])))
    }

    pub fn newest_timestamp(&self) -> Option<i64> {
        self.read().lines.back().map(|s| s.line.timestamp_ms)
    }

    pub fn len(&self) -> usize {
        self.read().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().lines.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.lines.clear();
        inner.scrolled = 0;
    }
}
