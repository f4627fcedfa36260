// Forward-only row iteration over a paged row source, with an optional row limit.
use std::collections::VecDeque;

use crate::core::backend::{PagingState, RowSource, ScanRequest};
use crate::core::error::Error;
use crate::core::value::Row;

#[derive(Debug)]
pub struct RowCursor<'a, S: RowSource + ?Sized> {
    source: &'a S,
    request: ScanRequest,
    remaining: Option<u64>,
    buffered: VecDeque<Row>,
    next: Option<PagingState>,
    exhausted: bool,
    pages: u64,
}

impl<'a, S: RowSource + ?Sized> RowCursor<'a, S> {
    pub fn new(source: &'a S, request: ScanRequest, limit: Option<u64>) -> Self {
        Self {
            source,
            request,
            remaining: limit,
            buffered: VecDeque::new(),
            next: None,
            exhausted: false,
            pages: 0,
        }
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages
    }

    fn fill(&mut self) -> Result<(), Error> {
        while self.buffered.is_empty() && !self.exhausted {
            let mut request = self.request.clone();
            if let Some(remaining) = self.remaining {
                let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
                request.page_size = request.page_size.min(remaining).max(1);
            }
            let page = self.source.fetch_page(&request, self.next.as_ref())?;
            self.pages += 1;
            self.exhausted = page.next.is_none();
            self.next = page.next;
            self.buffered.extend(page.rows);
        }
        Ok(())
    }
}

impl<S: RowSource + ?Sized> Iterator for RowCursor<'_, S> {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        if let Err(err) = self.fill() {
            self.exhausted = true;
            self.buffered.clear();
            return Some(Err(err));
        }
        let row = self.buffered.pop_front()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(Ok(row))
    }
}
