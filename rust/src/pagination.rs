//! Per-scope page cursors and the advance policy.
//!
//! A cursor only moves forward within one scope session. Selecting a scope (or changing
//! a filter) starts a new session at page 1 and bumps the generation, so any result
//! still in flight for the old session resolves as stale and leaves the cursor alone.

use std::collections::HashMap;

use crate::state::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// Highest page loaded in this session, 1-based. Zero until page 1 has loaded, so a
    /// failed first page is asked for again rather than skipped.
    pub page: u32,
    pub all_loaded: bool,
    in_flight: Option<u32>,
    armed: bool,
}

impl PageCursor {
    fn fresh() -> Self {
        Self {
            page: 0,
            all_loaded: false,
            in_flight: Some(1),
            armed: true,
        }
    }

    pub fn in_flight(&self) -> Option<u32> {
        self.in_flight
    }
}

/// Identifies one cursor-tracked fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTicket {
    pub scope: Scope,
    pub page: u32,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Loaded { empty: bool },
    Failed,
}

#[derive(Debug)]
pub struct Pagination {
    scope: Scope,
    cursors: HashMap<Scope, PageCursor>,
    generation: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(Scope::Mine)
    }
}

impl Pagination {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            cursors: HashMap::new(),
            generation: 0,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Switch scope. Returns the page-1 ticket to fetch, or `None` when `scope` is
    /// already current.
    pub fn select_scope(&mut self, scope: Scope) -> Option<PageTicket> {
        if scope == self.scope && self.cursors.contains_key(&scope) {
            return None;
        }
        self.scope = scope;
        Some(self.restart())
    }

    /// Start a new session for the current scope at page 1.
    pub fn restart(&mut self) -> PageTicket {
        self.generation += 1;
        self.cursors.insert(self.scope, PageCursor::fresh());
        PageTicket {
            scope: self.scope,
            page: 1,
            generation: self.generation,
        }
    }

    /// Allow the next end-reached signal through.
    pub fn arm(&mut self) {
        if let Some(cursor) = self.cursors.get_mut(&self.scope) {
            cursor.armed = true;
        }
    }

    /// Ask for the next page. Ignored while a fetch is in flight, once the scope is
    /// exhausted, or when the previous signal has not been re-armed.
    pub fn request_advance(&mut self) -> Option<PageTicket> {
        let cursor = self.cursors.get_mut(&self.scope)?;
        if cursor.in_flight.is_some() || cursor.all_loaded || !cursor.armed {
            return None;
        }
        let page = cursor.page + 1;
        cursor.armed = false;
        cursor.in_flight = Some(page);
        Some(PageTicket {
            scope: self.scope,
            page,
            generation: self.generation,
        })
    }

    /// Settle a fetch. Returns `false` for tickets from a superseded session.
    pub fn resolve(&mut self, ticket: PageTicket, outcome: PageOutcome) -> bool {
        if ticket.generation != self.generation || ticket.scope != self.scope {
            return false;
        }
        let Some(cursor) = self.cursors.get_mut(&ticket.scope) else {
            return false;
        };
        if cursor.in_flight != Some(ticket.page) {
            return false;
        }
        cursor.in_flight = None;
        match outcome {
            PageOutcome::Loaded { empty: true } => cursor.all_loaded = true,
            PageOutcome::Loaded { empty: false } => cursor.page = cursor.page.max(ticket.page),
            // Page stays where it was so the next signal retries the same page.
            PageOutcome::Failed => cursor.armed = true,
        }
        true
    }

    pub fn cursor(&self) -> Option<&PageCursor> {
        self.cursors.get(&self.scope)
    }

    pub fn is_fetching(&self) -> bool {
        self.cursor().is_some_and(|c| c.in_flight.is_some())
    }

    pub fn all_loaded(&self) -> bool {
        self.cursor().is_some_and(|c| c.all_loaded)
    }

    /// Pages to refetch after a gap in realtime delivery.
    pub fn resync_pages(&self) -> Vec<u32> {
        match self.cursor() {
            Some(c) if c.page > 1 => vec![1, c.page],
            _ => vec![1],
        }
    }
}
