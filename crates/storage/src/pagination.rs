// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Utilities to manage paginated queries.
//!
//! Scans only ever go forward, in increasing ID order. Each page restarts
//! from the top of the filtered set, skipping the rows already visited.

/// Pagination parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Only return rows with an ID strictly greater than this one
    pub after: Option<i64>,

    /// The maximum number of items to return
    pub count: usize,
}

/// A node in a page, with a cursor
pub trait Node {
    /// The cursor of that particular node
    fn cursor(&self) -> i64;
}

impl Pagination {
    /// Creates a [`Pagination`] which gets the first N items
    #[must_use]
    pub const fn first(first: usize) -> Self {
        Self {
            after: None,
            count: first,
        }
    }

    /// Get items after the given cursor
    #[must_use]
    pub const fn after(mut self, id: i64) -> Self {
        self.after = Some(id);
        self
    }

    /// Clear the cursor, to restart from the top
    #[must_use]
    pub const fn clear(mut self) -> Self {
        self.after = None;
        self
    }

    /// Whether the given ID falls in the range of this pagination
    #[must_use]
    pub fn includes(&self, id: i64) -> bool {
        self.after.is_none_or(|after| id > after)
    }

    /// Move the cursor past the given page
    #[must_use]
    pub fn advance<T: Node>(self, edges: &[T]) -> Self {
        match edges.iter().map(Node::cursor).max() {
            Some(last) => self.after(last),
            None => self,
        }
    }
}

impl Node for janitor_data_model::Question {
    fn cursor(&self) -> i64 {
        self.id
    }
}

impl Node for janitor_data_model::QuizAttempt {
    fn cursor(&self) -> i64 {
        self.id
    }
}

impl Node for janitor_data_model::QuestionCategory {
    fn cursor(&self) -> i64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row(i64);

    impl Node for Row {
        fn cursor(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn advance_moves_past_the_last_row() {
        let pagination = Pagination::first(3);
        assert!(pagination.includes(1));

        let pagination = pagination.advance(&[Row(4), Row(9), Row(7)]);
        assert_eq!(pagination.after, Some(9));
        assert!(!pagination.includes(9));
        assert!(pagination.includes(10));

        // An empty page leaves the cursor where it was
        let pagination = pagination.advance::<Row>(&[]);
        assert_eq!(pagination.after, Some(9));

        assert_eq!(pagination.clear(), Pagination::first(3));
    }
}
