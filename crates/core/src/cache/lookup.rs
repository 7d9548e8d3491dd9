//! Read-side access to a built recommendation cache.

use crate::domain::cache::RecommendationCacheRow;
use crate::policy::{MAX_LEVEL, MIN_LEVEL};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_LEVEL: u8 = 3;
pub const DEFAULT_ARCHETYPE: &str = "ABWC";
pub const DEFAULT_TOP_N: usize = 5;

/// Parses `3`, `level3` or `Level 3` and clamps into the supported level range.
///
/// Anything unparsable falls back to [`DEFAULT_LEVEL`].
pub fn normalize_level(raw: Option<&str>) -> u8 {
    let Some(raw) = raw else {
        return DEFAULT_LEVEL;
    };
    let lowered = raw.trim().to_lowercase();
    let digits = lowered.strip_prefix("level").unwrap_or(&lowered).trim();
    match digits.parse::<i64>() {
        Ok(n) => clamp_level(n),
        Err(_) => DEFAULT_LEVEL,
    }
}

pub fn clamp_level(level: i64) -> u8 {
    level.clamp(MIN_LEVEL as i64, MAX_LEVEL as i64) as u8
}

pub fn normalize_archetype(raw: Option<&str>) -> String {
    raw.map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ARCHETYPE.to_string())
}

/// Funds tracking the same index compare equal after dropping parentheses and whitespace.
fn base_index_key(row: &RecommendationCacheRow) -> String {
    match row.base_index.as_deref() {
        Some(idx) if !idx.trim().is_empty() => idx
            .chars()
            .filter(|c| !matches!(c, '(' | ')') && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect(),
        // No index: the fund only collides with itself.
        _ => format!("\u{0}{}", row.fund_id),
    }
}

fn matches_keyword(row: &RecommendationCacheRow, keyword: &str) -> bool {
    [
        Some(row.fund_name.as_str()),
        row.category.as_deref(),
        row.base_index.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(keyword))
}

#[derive(Debug, Default)]
struct Bucket {
    /// Best score first, ties by fund id.
    rows: Vec<RecommendationCacheRow>,
    by_fund: HashMap<String, usize>,
}

/// Cache rows bucketed by (level, archetype).
#[derive(Debug, Default)]
pub struct CacheIndex {
    buckets: HashMap<(u8, String), Bucket>,
    rows: usize,
}

impl CacheIndex {
    pub fn from_rows(rows: Vec<RecommendationCacheRow>) -> Self {
        let total = rows.len();
        let mut buckets: HashMap<(u8, String), Bucket> = HashMap::new();
        for row in rows {
            buckets
                .entry((row.level, row.archetype_id.clone()))
                .or_default()
                .rows
                .push(row);
        }

        for bucket in buckets.values_mut() {
            bucket.rows.sort_by(|a, b| {
                b.final_score
                    .total_cmp(&a.final_score)
                    .then_with(|| a.fund_id.cmp(&b.fund_id))
            });
            bucket.by_fund = bucket
                .rows
                .iter()
                .enumerate()
                .map(|(i, r)| (r.fund_id.clone(), i))
                .collect();
        }

        Self {
            buckets,
            rows: total,
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn has_archetype(&self, archetype: &str) -> bool {
        self.buckets.keys().any(|(_, a)| a == archetype)
    }

    fn bucket(&self, level: u8, archetype: &str) -> Option<&Bucket> {
        self.buckets.get(&(level, archetype.to_string()))
    }

    /// Top `top_n` funds for the profile, optionally narrowed by a keyword matched against name,
    /// category and base index. Only the best-scoring fund per base index is kept.
    pub fn recommend(
        &self,
        level: u8,
        archetype: &str,
        category: Option<&str>,
        top_n: usize,
    ) -> Vec<&RecommendationCacheRow> {
        let Some(bucket) = self.bucket(level, archetype) else {
            return Vec::new();
        };
        let keyword = category
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty());

        let mut seen_index = HashSet::new();
        bucket
            .rows
            .iter()
            .filter(|r| keyword.as_deref().map_or(true, |k| matches_keyword(r, k)))
            .filter(|r| seen_index.insert(base_index_key(r)))
            .take(top_n)
            .collect()
    }

    pub fn fund(&self, level: u8, archetype: &str, fund_id: &str) -> Option<&RecommendationCacheRow> {
        let bucket = self.bucket(level, archetype)?;
        bucket.by_fund.get(fund_id).map(|i| &bucket.rows[*i])
    }

    /// Rows for the requested funds, in request order; funds not eligible for the profile are
    /// omitted.
    pub fn compare(
        &self,
        level: u8,
        archetype: &str,
        fund_ids: &[&str],
    ) -> Vec<&RecommendationCacheRow> {
        let mut seen = HashSet::new();
        fund_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.fund(level, archetype, id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fund_id: &str, level: u8, archetype: &str, score: f64, base_index: Option<&str>) -> RecommendationCacheRow {
        RecommendationCacheRow {
            fund_id: fund_id.to_string(),
            fund_name: format!("{fund_id} 반도체 ETF"),
            category: Some("주식-업종섹터".to_string()),
            base_index: base_index.map(str::to_string),
            level,
            archetype_id: archetype.to_string(),
            base_score: score,
            final_score: score,
            risk_tier: Some(1),
            aum: None,
            avg_volume: None,
            volatility: None,
            expense_ratio: None,
        }
    }

    fn index() -> CacheIndex {
        CacheIndex::from_rows(vec![
            row("A", 3, "ABWC", 0.60, Some("KRX 반도체")),
            row("B", 3, "ABWC", 0.70, Some("(KRX) 반도체")),
            row("C", 3, "ABWC", 0.55, Some("KOSPI 200")),
            row("D", 3, "ABWC", 0.80, None),
            row("E", 3, "ABWC", 0.50, None),
            row("A", 3, "APWL", 0.90, Some("KRX 반도체")),
            row("A", 1, "ABWC", 0.60, Some("KRX 반도체")),
        ])
    }

    #[test]
    fn normalizes_levels() {
        assert_eq!(normalize_level(None), 3);
        assert_eq!(normalize_level(Some("4")), 4);
        assert_eq!(normalize_level(Some("level2")), 2);
        assert_eq!(normalize_level(Some("Level 5")), 5);
        assert_eq!(normalize_level(Some("9")), 5);
        assert_eq!(normalize_level(Some("-1")), 1);
        assert_eq!(normalize_level(Some("expert")), 3);
        assert_eq!(normalize_archetype(Some(" apwl ")), "APWL");
        assert_eq!(normalize_archetype(Some("")), "ABWC");
    }

    #[test]
    fn recommend_orders_by_score_and_dedups_base_index() {
        let idx = index();
        let ids: Vec<_> = idx
            .recommend(3, "ABWC", None, 10)
            .iter()
            .map(|r| r.fund_id.as_str())
            .collect();
        // B and A track the same index; B scores higher. Funds without an index never collide.
        assert_eq!(ids, vec!["D", "B", "C", "E"]);

        let top2: Vec<_> = idx.recommend(3, "ABWC", None, 2).iter().map(|r| r.fund_id.clone()).collect();
        assert_eq!(top2, vec!["D", "B"]);
    }

    #[test]
    fn recommend_filters_by_keyword() {
        let idx = index();
        let hits = idx.recommend(3, "ABWC", Some("kospi"), 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fund_id, "C");
        assert!(idx.recommend(3, "ABWC", Some("채권"), 5).is_empty());
        assert!(idx.recommend(2, "ABWC", None, 5).is_empty());
    }

    #[test]
    fn fund_and_compare_lookups() {
        let idx = index();
        assert_eq!(idx.fund(3, "APWL", "A").map(|r| r.final_score), Some(0.90));
        assert!(idx.fund(1, "ABWC", "B").is_none());

        let cmp: Vec<_> = idx
            .compare(3, "ABWC", &["C", "missing", "A", "C"])
            .iter()
            .map(|r| r.fund_id.as_str())
            .collect();
        assert_eq!(cmp, vec!["C", "A"]);
        assert_eq!(idx.len(), 7);
        assert!(idx.has_archetype("APWL"));
        assert!(!idx.has_archetype("ZZZZ"));
    }
}
