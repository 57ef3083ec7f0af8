//! Windowed per-stream row buffers feeding the execution plan.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::value::Map;

/// How many rows of a stream stay in scope for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
  /// The most recent `n` rows.
  Count(usize),
  /// Rows whose event time is within the duration of the newest row.
  Time(Duration),
}

/// The windowed buffer for one upstream stream.
#[derive(Debug)]
pub struct StreamBuffer {
  window: WindowSpec,
  rows: VecDeque<(DateTime<Utc>, Map)>,
}

impl StreamBuffer {
  /// Creates an empty buffer with the given window.
  pub fn new(window: WindowSpec) -> Self {
    Self {
      window,
      rows: VecDeque::new(),
    }
  }

  /// Appends a row and evicts rows that fell out of the window.
  pub fn push(&mut self, timestamp: DateTime<Utc>, row: Map) {
    self.rows.push_back((timestamp, row));
    match self.window {
      WindowSpec::Count(n) => {
        while self.rows.len() > n {
          self.rows.pop_front();
        }
      }
      WindowSpec::Time(range) => {
        let horizon = timestamp - range;
        while self
          .rows
          .front()
          .map(|(ts, _)| *ts < horizon)
          .unwrap_or(false)
        {
          self.rows.pop_front();
        }
      }
    }
  }

  /// The buffered rows, oldest first.
  pub fn rows(&self) -> impl Iterator<Item = &Map> {
    self.rows.iter().map(|(_, row)| row)
  }

  /// Number of buffered rows.
  pub fn len(&self) -> usize {
    self.rows.len()
  }

  /// True when nothing is buffered.
  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }
}
