//! Fuzzy catalog search scoped to a warehouse's in-stock items.
//!
//! Candidates come from a bounded paginated scan of the catalog table
//! (historical name versions included), restricted to items with positive
//! on-hand quantity in the requested warehouse. Names are normalized
//! (NFKD, combining marks stripped, lowercased) and scored with the
//! maximum of token-set, token-sort, and partial ratio; the token variants
//! are composed over rapidfuzz's base `ratio` scorer. When nothing clears
//! the cutoff, substring containment and then token-prefix matching rescue
//! candidates at maximal score. Output is deterministic: score descending,
//! then name ascending.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use cartage_core::{ItemId, WarehouseId};

use crate::stock::StockOracle;
use crate::store::{Item, KeyValueStore, StoreError, Value};

/// Attribute names of the catalog table.
mod attr {
    pub const ITEM_ID: &str = "item_id";
    pub const NAME: &str = "name";
    pub const CREATED_AT: &str = "created_at";
}

/// Search parameters, already syntactically validated by the handler.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Free-text query.
    pub query: String,
    /// Similarity cutoff; clamped into `[0, 100]`.
    pub cutoff: f64,
    /// Maximum number of results.
    pub limit: usize,
    /// The warehouse whose in-stock items scope the catalog.
    pub warehouse: WarehouseId,
}

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// The catalog item.
    pub item_id: ItemId,
    /// The item's most recent name version.
    pub name: String,
}

/// A full search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    /// Ordered hits.
    pub results: Vec<SearchHit>,
    /// True when the catalog scan stopped at its page/item caps.
    #[serde(skip)]
    pub partial: bool,
    /// Where a follow-up scan would resume, when partial.
    pub next_cursor: Option<Item>,
}

/// Search failures.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The query was empty after trimming.
    #[error("Missing 'query' parameter")]
    EmptyQuery,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
struct CatalogRecord {
    item_id: ItemId,
    name: String,
    created_at: Option<DateTime<Utc>>,
}

/// Catalog search over a bounded scan.
#[derive(Clone)]
pub struct CatalogSearch {
    store: Arc<dyn KeyValueStore>,
    stock: Arc<dyn StockOracle>,
    table: String,
    page_limit: usize,
    item_limit: usize,
}

impl CatalogSearch {
    /// Create a search over `table`, scanning at most `page_limit` pages or
    /// `item_limit` rows per request.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        stock: Arc<dyn StockOracle>,
        table: impl Into<String>,
        page_limit: usize,
        item_limit: usize,
    ) -> Self {
        Self {
            store,
            stock,
            table: table.into(),
            page_limit: page_limit.max(1),
            item_limit: item_limit.max(1),
        }
    }

    /// Run a search.
    ///
    /// # Errors
    ///
    /// [`SearchError::EmptyQuery`] for a blank query, otherwise
    /// [`SearchError::Store`].
    pub async fn search(&self, params: &SearchQuery) -> Result<SearchResults, SearchError> {
        let term = normalize(params.query.trim());
        if term.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let cutoff = params.cutoff.clamp(0.0, 100.0);

        let in_stock = self.stock.in_stock_ids(&params.warehouse).await?;
        let (records, partial, next_cursor) = self.scan_catalog().await?;

        let records: Vec<&CatalogRecord> = records
            .iter()
            .filter(|record| in_stock.contains(&record.item_id))
            .collect();

        // Group historical name versions by normalized name.
        let mut by_name: HashMap<String, Vec<&CatalogRecord>> = HashMap::new();
        for record in &records {
            by_name
                .entry(normalize(&record.name))
                .or_default()
                .push(record);
        }

        let mut matched: Vec<(&str, f64)> = by_name
            .keys()
            .map(|name| (name.as_str(), similarity(&term, name)))
            .filter(|(_, score)| *score >= cutoff)
            .collect();

        // Rescue passes, each hit at maximal score.
        if matched.is_empty() {
            matched = by_name
                .keys()
                .filter(|name| name.contains(&term))
                .map(|name| (name.as_str(), 100.0))
                .collect();
        }
        if matched.is_empty() {
            matched = by_name
                .keys()
                .filter(|name| token_prefix_match(&term, name))
                .map(|name| (name.as_str(), 100.0))
                .collect();
        }
        debug!(term = %term, candidates = by_name.len(), matched = matched.len(), "scored catalog");

        // For each matched item keep its best score and, across all of the
        // item's stored versions, the most recently created name.
        let mut best_score: HashMap<ItemId, f64> = HashMap::new();
        for (name, score) in &matched {
            if let Some(group) = by_name.get(*name) {
                for record in group {
                    let entry = best_score.entry(record.item_id).or_insert(*score);
                    if *score > *entry {
                        *entry = *score;
                    }
                }
            }
        }

        let mut latest: HashMap<ItemId, &CatalogRecord> = HashMap::new();
        for record in &records {
            if !best_score.contains_key(&record.item_id) {
                continue;
            }
            latest
                .entry(record.item_id)
                .and_modify(|current| {
                    if record.created_at > current.created_at {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        let mut hits: Vec<(f64, SearchHit)> = latest
            .into_iter()
            .map(|(item_id, record)| {
                let score = best_score.get(&item_id).copied().unwrap_or(0.0);
                (
                    score,
                    SearchHit {
                        item_id,
                        name: record.name.clone(),
                    },
                )
            })
            .collect();

        hits.sort_by(|(score_a, hit_a), (score_b, hit_b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| hit_a.name.cmp(&hit_b.name))
                .then_with(|| hit_a.item_id.cmp(&hit_b.item_id))
        });
        hits.truncate(params.limit.max(1));

        Ok(SearchResults {
            results: hits.into_iter().map(|(_, hit)| hit).collect(),
            partial,
            next_cursor,
        })
    }

    async fn scan_catalog(
        &self,
    ) -> Result<(Vec<CatalogRecord>, bool, Option<Item>), StoreError> {
        let projection = [attr::ITEM_ID, attr::NAME, attr::CREATED_AT];
        let mut records = Vec::new();
        let mut start = None;
        let mut pages = 0;
        loop {
            let page = self.store.scan(&self.table, &projection, start).await?;
            pages += 1;
            records.extend(page.items.iter().filter_map(decode_record));

            let capped = pages >= self.page_limit || records.len() >= self.item_limit;
            if capped {
                return Ok((records, true, page.next));
            }
            match page.next {
                Some(next) => start = Some(next),
                None => return Ok((records, false, None)),
            }
        }
    }
}

/// Rows without an id or a usable name are skipped, not errors.
fn decode_record(item: &Item) -> Option<CatalogRecord> {
    let item_id = item.get(attr::ITEM_ID).and_then(Value::as_int)?;
    let name = item.get(attr::NAME).and_then(Value::as_text)?.trim();
    if name.is_empty() {
        return None;
    }
    Some(CatalogRecord {
        item_id: ItemId::new(item_id),
        name: name.to_owned(),
        created_at: item
            .get(attr::CREATED_AT)
            .and_then(Value::as_text)
            .and_then(parse_created_at),
    })
}

/// Catalog timestamps appear both with and without offsets.
fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim().replace(' ', "T");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Case-fold and strip diacritics.
fn normalize(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Base similarity in `[0, 100]`.
fn ratio(a: &str, b: &str) -> f64 {
    // rapidfuzz returns a normalized similarity in `[0.0, 1.0]`; this module
    // works in percentages, so scale it onto `[0, 100]`.
    rapidfuzz::fuzz::ratio(a.chars(), b.chars()) * 100.0
}

/// Maximum of token-set, token-sort, and partial ratio.
fn similarity(query: &str, candidate: &str) -> f64 {
    token_set_ratio(query, candidate)
        .max(token_sort_ratio(query, candidate))
        .max(partial_ratio(query, candidate))
}

fn tokens(s: &str) -> Vec<&str> {
    s.split_whitespace().collect()
}

fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let mut ta = tokens(a);
    let mut tb = tokens(b);
    ta.sort_unstable();
    tb.sort_unstable();
    ratio(&ta.join(" "), &tb.join(" "))
}

fn token_set_ratio(a: &str, b: &str) -> f64 {
    let mut ta = tokens(a);
    let mut tb = tokens(b);
    ta.sort_unstable();
    ta.dedup();
    tb.sort_unstable();
    tb.dedup();

    let intersection: Vec<&str> = ta.iter().filter(|t| tb.contains(t)).copied().collect();
    let diff_a: Vec<&str> = ta.iter().filter(|t| !tb.contains(t)).copied().collect();
    let diff_b: Vec<&str> = tb.iter().filter(|t| !ta.contains(t)).copied().collect();

    let sect = intersection.join(" ");
    let sect_a = join_nonempty(&sect, &diff_a.join(" "));
    let sect_b = join_nonempty(&sect, &diff_b.join(" "));

    ratio(&sect, &sect_a)
        .max(ratio(&sect, &sect_b))
        .max(ratio(&sect_a, &sect_b))
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_owned(),
        (_, true) => a.to_owned(),
        _ => format!("{a} {b}"),
    }
}

/// Best alignment of the shorter string against same-length windows of the
/// longer one.
fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return 0.0;
    }
    let long_chars: Vec<char> = long.chars().collect();
    if long_chars.len() == short_len {
        return ratio(short, long);
    }

    let mut best: f64 = 0.0;
    for window in long_chars.windows(short_len) {
        let candidate: String = window.iter().collect();
        best = best.max(ratio(short, &candidate));
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Every query token is a prefix of some candidate token.
fn token_prefix_match(query: &str, candidate: &str) -> bool {
    let candidate_tokens = tokens(candidate);
    let query_tokens = tokens(query);
    !query_tokens.is_empty()
        && query_tokens.iter().all(|q| {
            candidate_tokens
                .iter()
                .any(|c| c.starts_with(q))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stock::{StoreStockOracle, stock_item};
    use crate::store::memory::MemoryStore;

    fn catalog_row(item_id: i64, name: &str, created_at: &str) -> Item {
        let mut item = Item::new();
        item.insert(attr::ITEM_ID.into(), Value::Int(item_id));
        item.insert(attr::NAME.into(), Value::text(name));
        item.insert(attr::CREATED_AT.into(), Value::text(created_at));
        item
    }

    async fn fixture(rows: Vec<Item>, stocked: &[i64]) -> CatalogSearch {
        let store = MemoryStore::with_page_size(2);
        store.create_table("catalog", "item_id", Some("created_at")).await;
        store
            .create_table("stock", "item_id", Some("warehouse_id"))
            .await;
        for row in rows {
            store.put("catalog", row).await.unwrap();
        }
        for id in stocked {
            store
                .put(
                    "stock",
                    stock_item(ItemId::new(*id), &WarehouseId::new("w1"), 5),
                )
                .await
                .unwrap();
        }

        let shared: Arc<dyn KeyValueStore> = Arc::new(store);
        let stock = Arc::new(StoreStockOracle::new(
            Arc::clone(&shared),
            "stock",
            "warehouse_id_index",
        ));
        CatalogSearch::new(shared, stock, "catalog", 100, 10_000)
    }

    fn query(q: &str, cutoff: f64) -> SearchQuery {
        SearchQuery {
            query: q.to_owned(),
            cutoff,
            limit: 10,
            warehouse: WarehouseId::new("w1"),
        }
    }

    #[test]
    fn normalize_strips_diacritics_and_case() {
        assert_eq!(normalize("CRÈME brûlée"), "creme brulee");
        assert_eq!(normalize("Kubek Ołówkowy"), "kubek ołowkowy");
    }

    #[test]
    fn token_set_full_overlap_scores_maximal() {
        assert!((token_set_ratio("buty", "buty zimowe") - 100.0).abs() < f64::EPSILON);
        assert!(token_set_ratio("buty", "bucik") < 70.0);
    }

    #[test]
    fn partial_ratio_finds_substring() {
        assert!((partial_ratio("zim", "buty zimowe") - 100.0).abs() < f64::EPSILON);
        assert!(partial_ratio("xyz", "buty") < 50.0);
    }

    #[test]
    fn token_prefix_matching() {
        assert!(token_prefix_match("bu zi", "buty zimowe"));
        assert!(!token_prefix_match("bu xo", "buty zimowe"));
    }

    #[tokio::test]
    async fn ranks_closer_name_first_and_applies_cutoff() {
        let search = fixture(
            vec![
                catalog_row(1, "Buty zimowe", "2024-01-01T00:00:00"),
                catalog_row(2, "Bucik", "2024-01-01T00:00:00"),
            ],
            &[1, 2],
        )
        .await;

        // At cutoff 70 only the token-overlap match survives.
        let results = search.search(&query("buty", 70.0)).await.unwrap();
        let names: Vec<&str> = results.results.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["Buty zimowe"]);

        // At a lower cutoff both appear, better match first.
        let results = search.search(&query("buty", 40.0)).await.unwrap();
        let names: Vec<&str> = results.results.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["Buty zimowe", "Bucik"]);
    }

    #[tokio::test]
    async fn results_are_deterministic() {
        let search = fixture(
            vec![
                catalog_row(1, "Buty zimowe", "2024-01-01T00:00:00"),
                catalog_row(2, "Buty letnie", "2024-01-01T00:00:00"),
                catalog_row(3, "Bucik", "2024-01-01T00:00:00"),
            ],
            &[1, 2, 3],
        )
        .await;

        let first = search.search(&query("buty", 40.0)).await.unwrap();
        for _ in 0..3 {
            let again = search.search(&query("buty", 40.0)).await.unwrap();
            let a: Vec<_> = first.results.iter().map(|h| h.item_id).collect();
            let b: Vec<_> = again.results.iter().map(|h| h.item_id).collect();
            assert_eq!(a, b);
        }
        // Equal scores break ties by name ascending.
        let names: Vec<&str> = first.results.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["Buty letnie", "Buty zimowe", "Bucik"]);
    }

    #[tokio::test]
    async fn scoped_to_in_stock_items() {
        let search = fixture(
            vec![
                catalog_row(1, "Buty zimowe", "2024-01-01T00:00:00"),
                catalog_row(2, "Buty letnie", "2024-01-01T00:00:00"),
            ],
            &[2],
        )
        .await;

        let results = search.search(&query("buty", 40.0)).await.unwrap();
        let ids: Vec<ItemId> = results.results.iter().map(|h| h.item_id).collect();
        assert_eq!(ids, [ItemId::new(2)]);
    }

    #[tokio::test]
    async fn latest_name_version_wins() {
        let search = fixture(
            vec![
                catalog_row(7, "Buty robocze stare", "2023-01-01T00:00:00"),
                catalog_row(7, "Buty robocze", "2024-06-01T00:00:00"),
            ],
            &[7],
        )
        .await;

        let results = search.search(&query("buty", 40.0)).await.unwrap();
        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results.first().unwrap().name, "Buty robocze");
    }

    #[tokio::test]
    async fn token_prefix_rescues_below_cutoff() {
        let search = fixture(
            vec![catalog_row(1, "Buty zimowe", "2024-01-01T00:00:00")],
            &[1],
        )
        .await;

        let results = search.search(&query("bu zi", 95.0)).await.unwrap();
        assert_eq!(results.results.len(), 1);
    }

    #[tokio::test]
    async fn diacritics_fold_for_matching() {
        let search = fixture(
            vec![catalog_row(1, "Żółty kubek", "2024-01-01T00:00:00")],
            &[1],
        )
        .await;

        let results = search.search(&query("zolty", 70.0)).await.unwrap();
        assert_eq!(results.results.len(), 1);
    }

    #[tokio::test]
    async fn empty_query_rejected() {
        let search = fixture(vec![], &[]).await;
        assert!(matches!(
            search.search(&query("   ", 70.0)).await,
            Err(SearchError::EmptyQuery)
        ));
    }

    #[tokio::test]
    async fn bounded_scan_reports_partial() {
        let rows = (1..=10)
            .map(|i| catalog_row(i, &format!("Buty {i}"), "2024-01-01T00:00:00"))
            .collect();
        let store_backed = fixture(rows, &[1, 2, 3]).await;
        // Rebuild with a tight page cap: 2 rows per page, 2 pages max.
        let tight = CatalogSearch {
            page_limit: 2,
            ..store_backed
        };

        let results = tight.search(&query("buty", 40.0)).await.unwrap();
        assert!(results.partial);
        assert!(results.next_cursor.is_some());
    }
}
