use std::sync::Arc;

use crate::api::LogInner;
use crate::model::Event;

/// Half-open range `[from, to)` over a log.
///
/// Nothing is copied up front; every `iter()` call starts again at `from`
/// and reads events as it goes.
#[derive(Clone)]
pub struct EventSlice {
    inner: Arc<LogInner>,
    from: u64,
    to: u64,
}

impl EventSlice {
    pub(crate) fn new(inner: Arc<LogInner>, from: u64, to: u64) -> Self {
        Self { inner, from, to }
    }

    pub fn from(&self) -> u64 {
        self.from
    }

    pub fn to(&self) -> u64 {
        self.to
    }

    pub fn len(&self) -> usize {
        (self.to - self.from) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    pub fn iter(&self) -> SliceIter<'_> {
        SliceIter {
            slice: self,
            pos: self.from,
        }
    }

    pub fn to_vec(&self) -> Vec<Arc<Event>> {
        self.iter().collect()
    }
}

impl std::fmt::Debug for EventSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSlice")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

pub struct SliceIter<'a> {
    slice: &'a EventSlice,
    pos: u64,
}

impl<'a> Iterator for SliceIter<'a> {
    type Item = Arc<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.slice.to {
            return None;
        }
        let event = self.slice.inner.event_at(self.pos);
        self.pos += 1;
        event
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.slice.to - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

impl<'a> IntoIterator for &'a EventSlice {
    type Item = Arc<Event>;
    type IntoIter = SliceIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
