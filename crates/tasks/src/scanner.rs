// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Walk through large filtered sets, one page at a time.

use std::collections::VecDeque;

use async_trait::async_trait;
use janitor_data_model::{Question, QuizAttempt};
use janitor_storage::{
    Node, Pagination, RepositoryAccess, RepositoryError, attempt::QuizAttemptFilter,
};

use crate::{Deadline, State};

/// How many rows are fetched at once
pub const PAGE_SIZE: usize = 10_000;

/// A filtered set of rows, fetched in pages ordered by ID
#[async_trait]
pub trait PageSource: Send {
    /// The rows of the set
    type Item: Node + Send;

    /// Fetch the rows after the cursor of the pagination
    async fn fetch(&mut self, pagination: Pagination) -> Result<Vec<Self::Item>, RepositoryError>;
}

/// Yields the rows of a [`PageSource`] lazily, until the set is exhausted or
/// the deadline is reached.
///
/// Each page re-applies the filter, so rows removed while processing the
/// previous page are not seen again. Rows which were kept are skipped thanks
/// to the cursor on their ID, which guarantees the scan ends.
pub struct PagedScanner<'d, S: PageSource> {
    source: S,
    deadline: &'d Deadline,
    pagination: Pagination,
    buffer: VecDeque<S::Item>,
    exhausted: bool,
    halted: bool,
}

impl<'d, S: PageSource> PagedScanner<'d, S> {
    /// Scan the given source with the default page size
    pub fn new(source: S, deadline: &'d Deadline) -> Self {
        Self::with_page_size(source, deadline, PAGE_SIZE)
    }

    /// Scan the given source with a custom page size
    pub fn with_page_size(source: S, deadline: &'d Deadline, page_size: usize) -> Self {
        Self {
            source,
            deadline,
            pagination: Pagination::first(page_size),
            buffer: VecDeque::new(),
            exhausted: false,
            halted: false,
        }
    }

    /// Get the next row.
    ///
    /// Returns `None` once the set is exhausted, or once the deadline is
    /// reached, in which case [`PagedScanner::halted`] returns `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if a page could not be fetched
    pub async fn next(&mut self) -> Result<Option<S::Item>, RepositoryError> {
        if self.deadline.is_reached() {
            self.halted = true;
            return Ok(None);
        }

        if let Some(row) = self.buffer.pop_front() {
            return Ok(Some(row));
        }

        if self.exhausted {
            return Ok(None);
        }

        let page = self.source.fetch(self.pagination).await?;
        if page.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.pagination = self.pagination.advance(&page);
        self.buffer.extend(page);
        Ok(self.buffer.pop_front())
    }

    /// Whether the scan stopped because of the deadline
    #[must_use]
    pub fn halted(&self) -> bool {
        self.halted
    }
}

/// The unused hidden questions of a context, or of the whole site
pub(crate) struct UnusedQuestions<'s> {
    pub state: &'s State,
    pub context_id: Option<i64>,
}

#[async_trait]
impl PageSource for UnusedQuestions<'_> {
    type Item = Question;

    async fn fetch(&mut self, pagination: Pagination) -> Result<Vec<Question>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let page = repo
            .question()
            .list_unused(self.context_id, pagination)
            .await?;
        repo.save().await?;
        Ok(page)
    }
}

/// The quiz attempts matching a filter
pub(crate) struct StaleAttempts<'s> {
    pub state: &'s State,
    pub filter: QuizAttemptFilter,
}

#[async_trait]
impl PageSource for StaleAttempts<'_> {
    type Item = QuizAttempt;

    async fn fetch(&mut self, pagination: Pagination) -> Result<Vec<QuizAttempt>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let page = repo.quiz_attempt().list(self.filter, pagination).await?;
        repo.save().await?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use janitor_storage::clock::MockClock;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Row(i64);

    impl Node for Row {
        fn cursor(&self) -> i64 {
            self.0
        }
    }

    /// Rows still in the set, and how many pages were fetched
    #[derive(Clone, Default)]
    struct Rows(Arc<Mutex<(Vec<i64>, usize)>>);

    impl Rows {
        fn remove(&self, id: i64) {
            self.0.lock().unwrap().0.retain(|row| *row != id);
        }

        fn fetches(&self) -> usize {
            self.0.lock().unwrap().1
        }
    }

    #[async_trait]
    impl PageSource for Rows {
        type Item = Row;

        async fn fetch(&mut self, pagination: Pagination) -> Result<Vec<Row>, RepositoryError> {
            let mut inner = self.0.lock().unwrap();
            inner.1 += 1;
            Ok(inner
                .0
                .iter()
                .copied()
                .filter(|id| pagination.includes(*id))
                .take(pagination.count)
                .map(Row)
                .collect())
        }
    }

    #[tokio::test]
    async fn kept_rows_do_not_loop() {
        let rows = Rows(Arc::new(Mutex::new(((1..=10).collect(), 0))));
        let deadline = Deadline::unlimited(Arc::new(MockClock::default()));
        let mut scanner = PagedScanner::with_page_size(rows.clone(), &deadline, 3);

        let mut seen = Vec::new();
        while let Some(Row(id)) = scanner.next().await.unwrap() {
            seen.push(id);
            // Keep the even rows, remove the others
            if id % 2 == 1 {
                rows.remove(id);
            }
        }

        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
        assert!(!scanner.halted());
        // Four full or partial pages, then an empty one
        assert_eq!(rows.fetches(), 5);
    }

    #[tokio::test]
    async fn empty_set() {
        let rows = Rows::default();
        let deadline = Deadline::unlimited(Arc::new(MockClock::default()));
        let mut scanner = PagedScanner::new(rows, &deadline);
        assert_eq!(scanner.next().await.unwrap(), None);
        assert!(!scanner.halted());
    }

    #[tokio::test]
    async fn stops_at_the_deadline() {
        let rows = Rows(Arc::new(Mutex::new(((1..=10).collect(), 0))));
        let clock = Arc::new(MockClock::default());
        let deadline = Deadline::after(clock.clone(), Some(chrono::Duration::seconds(3)));
        let mut scanner = PagedScanner::new(rows, &deadline);

        let mut seen = 0;
        while scanner.next().await.unwrap().is_some() {
            seen += 1;
            clock.advance(chrono::Duration::seconds(1));
        }

        assert_eq!(seen, 3);
        assert!(scanner.halted());
    }
}
