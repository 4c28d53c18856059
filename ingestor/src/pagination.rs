//! Relay-style connection assembly over an already fetched window.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `first`/`after`: newest to oldest.
    Forward,
    /// `last`/`before`: oldest to newest, returned newest first.
    Backward,
}

/// Validated pagination arguments. At most one of `after`/`before` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub direction: Direction,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl PageRequest {
    pub fn forward(limit: u32, after: Option<String>) -> Self {
        Self {
            limit,
            direction: Direction::Forward,
            after,
            before: None,
        }
    }

    pub fn backward(limit: u32, before: Option<String>) -> Self {
        Self {
            limit,
            direction: Direction::Backward,
            after: None,
            before,
        }
    }

    /// The incoming cursor for this request's direction.
    pub fn cursor(&self) -> Option<&str> {
        match self.direction {
            Direction::Forward => self.after.as_deref(),
            Direction::Backward => self.before.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}

/// Wraps `rows` (already in output order) into a connection.
///
/// Page flags come from window saturation rather than a second count: a
/// window holding exactly `limit` rows reports more data in the direction of
/// travel even when the data ends exactly there.
pub fn paginate<T, F>(rows: Vec<T>, request: &PageRequest, cursor_of: F) -> Connection<T>
where
    F: Fn(&T) -> String,
{
    let limit = request.limit as usize;
    let saturated = rows.len() >= limit;

    let edges: Vec<Edge<T>> = rows
        .into_iter()
        .take(limit)
        .map(|node| Edge {
            cursor: cursor_of(&node),
            node,
        })
        .collect();

    let (has_next_page, has_previous_page) = match request.direction {
        Direction::Forward => (saturated, request.after.is_some()),
        Direction::Backward => (request.before.is_some(), saturated),
    };

    let page_info = PageInfo {
        has_next_page,
        has_previous_page,
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
    };

    Connection { edges, page_info }
}
