//! Page-level text search over the rendered pages.
//!
//! A page matches when its extracted text contains the query at least once,
//! ignoring case. Matches are ordered by page and carry the character offset
//! of the first occurrence as a location hint.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cache::PageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    pub page_index: usize,
    pub first_offset: usize,
}

/// Blank queries match nothing. Any other query is matched as typed,
/// surrounding whitespace included.
pub fn search(query: &str, pages: &[PageRecord]) -> Vec<SearchMatch> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let needle = fold_case(query);

    pages
        .iter()
        .filter_map(|page| {
            find_folded(&page.text, &needle).map(|first_offset| SearchMatch {
                page_index: page.page_index,
                first_offset,
            })
        })
        .collect()
}

fn fold_case(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).collect()
}

/// Character offset in `text` where the case-folded `needle` first occurs.
fn find_folded(text: &str, needle: &str) -> Option<usize> {
    let mut haystack = String::with_capacity(text.len());
    // Original character index for every byte of `haystack`.
    let mut origins = Vec::with_capacity(text.len());
    for (index, c) in text.chars().enumerate() {
        haystack.extend(c.to_lowercase());
        origins.resize(haystack.len(), index);
    }
    haystack.find(needle).map(|byte_offset| origins[byte_offset])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub query: String,
    pub total: usize,
    pub current_index: Option<usize>,
}

/// Query state with debounced re-search and cyclic match navigation.
#[derive(Debug)]
pub struct SearchSession {
    query: String,
    matches: Vec<SearchMatch>,
    current: Option<usize>,
    debounce: Duration,
    deadline: Option<Instant>,
    searched_revision: Option<usize>,
}

impl SearchSession {
    pub fn new(debounce: Duration) -> Self {
        Self {
            query: String::new(),
            matches: Vec::new(),
            current: None,
            debounce,
            deadline: None,
            searched_revision: None,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_match(&self) -> Option<SearchMatch> {
        self.current.and_then(|index| self.matches.get(index).copied())
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn summary(&self) -> Option<SearchSummary> {
        if self.query.trim().is_empty() {
            return None;
        }
        Some(SearchSummary {
            query: self.query.clone(),
            total: self.matches.len(),
            current_index: self.current,
        })
    }

    /// Records a new query. Blank queries clear the results at once; anything
    /// else is searched after the debounce delay. Returns true when results
    /// changed immediately.
    pub fn set_query(&mut self, query: impl Into<String>, now: Instant) -> bool {
        let query = query.into();
        if query == self.query {
            return false;
        }
        self.query = query;

        if self.query.trim().is_empty() {
            self.deadline = None;
            return self.clear_results();
        }

        self.deadline = Some(now + self.debounce);
        false
    }

    /// Runs a debounced search whose delay has elapsed.
    pub fn poll(&mut self, now: Instant, pages: &[PageRecord], revision: usize) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.run(pages, revision);
                true
            }
            _ => false,
        }
    }

    /// Re-runs the current query when more page text has become available.
    /// `revision` grows with the number of settled pages.
    pub fn refresh(&mut self, pages: &[PageRecord], revision: usize) -> bool {
        if self.deadline.is_some() || self.query.trim().is_empty() {
            return false;
        }
        if self.searched_revision == Some(revision) {
            return false;
        }
        self.run(pages, revision);
        true
    }

    /// Drops results computed against another document; the query survives
    /// and is searched again once pages arrive.
    pub fn invalidate(&mut self) {
        self.matches.clear();
        self.current = None;
        self.searched_revision = None;
    }

    pub fn next_match(&mut self) -> Option<usize> {
        if self.matches.is_empty() {
            return None;
        }
        let next = match self.current {
            Some(index) => (index + 1) % self.matches.len(),
            None => 0,
        };
        self.current = Some(next);
        Some(self.matches[next].page_index)
    }

    pub fn previous_match(&mut self) -> Option<usize> {
        if self.matches.is_empty() {
            return None;
        }
        let len = self.matches.len();
        let previous = match self.current {
            Some(index) => (index + len - 1) % len,
            None => len - 1,
        };
        self.current = Some(previous);
        Some(self.matches[previous].page_index)
    }

    fn run(&mut self, pages: &[PageRecord], revision: usize) {
        self.matches = search(&self.query, pages);
        self.current = if self.matches.is_empty() { None } else { Some(0) };
        self.searched_revision = Some(revision);
        debug!(
            query = %self.query,
            matches = self.matches.len(),
            revision,
            "search completed"
        );
    }

    fn clear_results(&mut self) -> bool {
        let changed = !self.matches.is_empty() || self.current.is_some();
        self.matches.clear();
        self.current = None;
        self.searched_revision = None;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::cache::PageStatus;

    fn pages(texts: &[&str]) -> Vec<PageRecord> {
        texts
            .iter()
            .enumerate()
            .map(|(page_index, text)| PageRecord {
                page_index,
                raster: None,
                text: Arc::from(*text),
                status: PageStatus::Rendered,
            })
            .collect()
    }

    fn ten_pages_with_needle_on_2_5_9() -> Vec<PageRecord> {
        let texts: Vec<String> = (0..10)
            .map(|page| {
                if [2, 5, 9].contains(&page) {
                    format!("page {page} mentions the Thesis Defence twice: thesis")
                } else {
                    format!("page {page} is about something else")
                }
            })
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        pages(&refs)
    }

    #[test]
    fn search_is_case_insensitive_and_page_ordered() {
        let records = ten_pages_with_needle_on_2_5_9();
        let found: Vec<usize> = search("THESIS", &records)
            .iter()
            .map(|m| m.page_index)
            .collect();
        assert_eq!(found, vec![2, 5, 9]);
    }

    #[test]
    fn one_match_per_page_with_first_offset() {
        let records = pages(&["ab Ab aB", "nothing"]);
        let found = search("ab", &records);
        assert_eq!(
            found,
            vec![SearchMatch {
                page_index: 0,
                first_offset: 0
            }]
        );

        let records = pages(&["Ünïcode thesis"]);
        assert_eq!(search("THESIS", &records)[0].first_offset, 8);
    }

    #[test]
    fn offset_counts_characters_of_the_original_text() {
        // 'İ' folds to two characters.
        let records = pages(&["İstanbul thesis"]);
        assert_eq!(search("thesis", &records)[0].first_offset, 9);
        assert_eq!(search("İSTANBUL", &records)[0].first_offset, 0);
    }

    #[test]
    fn surrounding_whitespace_is_part_of_the_query() {
        let records = pages(&["the ending", "the end is near", "thesis"]);
        let found: Vec<usize> = search("end ", &records)
            .iter()
            .map(|m| m.page_index)
            .collect();
        assert_eq!(found, vec![1]);

        let found: Vec<usize> = search(" the", &records)
            .iter()
            .map(|m| m.page_index)
            .collect();
        assert!(found.is_empty());
    }

    #[test]
    fn blank_queries_match_nothing() {
        let records = pages(&["anything", "   "]);
        assert!(search("", &records).is_empty());
        assert!(search("   \t", &records).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_delays_search_until_quiet() {
        let records = ten_pages_with_needle_on_2_5_9();
        let mut session = SearchSession::new(Duration::from_millis(300));

        session.set_query("the", Instant::now());
        tokio::time::advance(Duration::from_millis(200)).await;
        session.set_query("thesis", Instant::now());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!session.poll(Instant::now(), &records, 10));
        assert!(session.matches().is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(session.poll(Instant::now(), &records, 10));
        assert_eq!(session.matches().len(), 3);
        assert_eq!(session.current_index(), Some(0));
        assert!(!session.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn next_match_wraps_around() {
        let records = ten_pages_with_needle_on_2_5_9();
        let mut session = SearchSession::new(Duration::ZERO);
        session.set_query("thesis", Instant::now());
        assert!(session.poll(Instant::now(), &records, 10));
        assert_eq!(session.current_match().unwrap().page_index, 2);

        let visited: Vec<usize> = (0..3).filter_map(|_| session.next_match()).collect();
        assert_eq!(visited, vec![5, 9, 2]);

        assert_eq!(session.previous_match(), Some(9));
        assert_eq!(session.previous_match(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_without_matches_is_a_no_op() {
        let records = pages(&["alpha", "beta"]);
        let mut session = SearchSession::new(Duration::ZERO);
        session.set_query("gamma", Instant::now());
        session.poll(Instant::now(), &records, 2);
        assert_eq!(session.next_match(), None);
        assert_eq!(session.previous_match(), None);
        assert_eq!(session.current_index(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_query_clears_results_immediately() {
        let records = pages(&["alpha"]);
        let mut session = SearchSession::new(Duration::ZERO);
        session.set_query("alpha", Instant::now());
        session.poll(Instant::now(), &records, 1);
        assert_eq!(session.matches().len(), 1);

        assert!(session.set_query("  ", Instant::now()));
        assert!(session.matches().is_empty());
        assert_eq!(session.current_index(), None);
        assert!(session.summary().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_picks_up_newly_rendered_text() {
        let mut records = pages(&["", ""]);
        let mut session = SearchSession::new(Duration::ZERO);
        session.set_query("late", Instant::now());
        session.poll(Instant::now(), &records, 0);
        assert!(session.matches().is_empty());

        assert!(!session.refresh(&records, 0));
        records[1].text = Arc::from("a late page");
        assert!(session.refresh(&records, 1));
        assert_eq!(session.current_match().unwrap().page_index, 1);
    }
}
