// Filtered opportunity listing and facet counts
use crate::model::{Opportunity, OpportunityStatus, StorageError, ValidationError};
use crate::storage::sqlite::{OPPORTUNITY_COLUMNS, OPPORTUNITY_FROM, SqliteStorage};

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Serialize;
use std::str::FromStr;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Score,
    PriceAsc,
    PriceDesc,
    Newest,
}

impl SortKey {
    fn order_by(&self) -> &'static str {
        match self {
            SortKey::Score => "o.score DESC, l.last_seen_at DESC, o.id ASC",
            SortKey::PriceAsc => "l.price ASC, o.id ASC",
            SortKey::PriceDesc => "l.price DESC, o.id ASC",
            SortKey::Newest => "l.published_at IS NULL, l.published_at DESC, o.id ASC",
        }
    }
}

impl FromStr for SortKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "score" => Ok(SortKey::Score),
            "price_asc" => Ok(SortKey::PriceAsc),
            "price_desc" => Ok(SortKey::PriceDesc),
            "newest" => Ok(SortKey::Newest),
            other => Err(ValidationError::InvalidValue {
                field: "sort",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    pub state: Option<String>,
    pub city: Option<String>,
    /// Substring match.
    pub neighborhood: Option<String>,
    pub min_score: Option<u8>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_area: Option<f64>,
    pub max_area: Option<f64>,
    pub statuses: Vec<OpportunityStatus>,
    pub bedrooms: Vec<u32>,
    pub sort: SortKey,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ListingQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.filter(|n| *n > 0).unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let text = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        if let Some(state) = text(&self.state) {
            clauses.push("LOWER(l.state) = LOWER(?)".into());
            values.push(Value::Text(state));
        }
        if let Some(city) = text(&self.city) {
            clauses.push("LOWER(l.city) = LOWER(?)".into());
            values.push(Value::Text(city));
        }
        if let Some(hood) = text(&self.neighborhood) {
            clauses.push("LOWER(l.neighborhood) LIKE '%' || LOWER(?) || '%'".into());
            values.push(Value::Text(hood));
        }
        if let Some(min) = self.min_score {
            clauses.push("o.score >= ?".into());
            values.push(Value::Integer(min as i64));
        }
        let ranges = [
            ("l.price >= ?", self.min_price),
            ("l.price <= ?", self.max_price),
            ("l.area >= ?", self.min_area),
            ("l.area <= ?", self.max_area),
        ];
        for (clause, bound) in ranges {
            if let Some(v) = bound {
                clauses.push(clause.into());
                values.push(Value::Real(v));
            }
        }
        if !self.statuses.is_empty() {
            clauses.push(format!("o.status IN ({})", placeholders(self.statuses.len())));
            values.extend(self.statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
        }
        if !self.bedrooms.is_empty() {
            clauses.push(format!("l.bedrooms IN ({})", placeholders(self.bedrooms.len())));
            values.extend(self.bedrooms.iter().map(|b| Value::Integer(*b as i64)));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Parses a comma-separated bedroom set such as `"2,3"`.
pub fn parse_bedrooms(raw: &str) -> Result<Vec<u32>, ValidationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u32>().map_err(|_| ValidationError::InvalidValue {
                field: "bedrooms",
                value: p.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetValue {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Facets {
    pub state: Vec<FacetValue>,
    pub city: Vec<FacetValue>,
    pub neighborhood: Vec<FacetValue>,
    pub status: Vec<FacetValue>,
    pub bedrooms: Vec<FacetValue>,
    pub score: Option<NumericRange>,
    pub price: Option<NumericRange>,
    pub area: Option<NumericRange>,
}

impl SqliteStorage {
    pub fn query_opportunities(&self, query: &ListingQuery) -> Result<Vec<Opportunity>, StorageError> {
        let (filter, mut values) = query.where_clause();
        let sql = format!(
            "SELECT {} {} {} ORDER BY {} LIMIT ? OFFSET ?",
            OPPORTUNITY_COLUMNS,
            OPPORTUNITY_FROM,
            filter,
            query.sort.order_by()
        );
        values.push(Value::Integer(query.effective_limit() as i64));
        values.push(Value::Integer(query.offset as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::map_opportunity(row)?);
        }
        Ok(out)
    }

    /// Value counts and numeric ranges under the same filters. Sort and paging are ignored.
    pub fn facets(&self, query: &ListingQuery) -> Result<Facets, StorageError> {
        let (filter, values) = query.where_clause();

        let mut facets = Facets {
            state: self.facet_counts("l.state", &filter, &values)?,
            city: self.facet_counts("l.city", &filter, &values)?,
            neighborhood: self.facet_counts("l.neighborhood", &filter, &values)?,
            status: self.facet_counts("o.status", &filter, &values)?,
            bedrooms: self.facet_counts("CAST(l.bedrooms AS TEXT)", &filter, &values)?,
            ..Default::default()
        };

        let sql = format!(
            "SELECT MIN(o.score), MAX(o.score), MIN(l.price), MAX(l.price), MIN(l.area), MAX(l.area) {} {}",
            OPPORTUNITY_FROM, filter
        );
        let bounds: [Option<f64>; 6] = self.conn.query_row(&sql, params_from_iter(values.iter()), |row| {
            Ok([row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?])
        })?;
        let range = |lo: Option<f64>, hi: Option<f64>| lo.zip(hi).map(|(min, max)| NumericRange { min, max });
        facets.score = range(bounds[0], bounds[1]);
        facets.price = range(bounds[2], bounds[3]);
        facets.area = range(bounds[4], bounds[5]);

        Ok(facets)
    }

    fn facet_counts(&self, column: &str, filter: &str, values: &[Value]) -> Result<Vec<FacetValue>, StorageError> {
        let sql = format!(
            "SELECT {col}, COUNT(*) {from} {filter} GROUP BY {col} ORDER BY COUNT(*) DESC, {col} ASC",
            col = column,
            from = OPPORTUNITY_FROM,
            filter = filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(FacetValue {
                value: row.get(0)?,
                count: row.get::<_, i64>(1)? as usize,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NormalizedListing, ScoreBreakdown, ScoreCard, ScoredListing};
    use chrono::{TimeZone, Utc};

    fn seed(storage: &SqliteStorage, id: &str, city: &str, hood: &str, price: f64, beds: u32, score: u8, day: u32) {
        let listing = NormalizedListing {
            source: "listings".into(),
            source_listing_id: id.into(),
            url: format!("https://listings.example.com/imovel/{id}"),
            title: format!("Imóvel {id}"),
            price,
            area: price / 10_000.0,
            bedrooms: beds,
            city: city.into(),
            state: "sp".into(),
            neighborhood: hood.into(),
            published_at: Some(Utc.with_ymd_and_hms(2026, 9, day, 0, 0, 0).unwrap()),
            price_per_area: Some(10_000.0),
            ..Default::default()
        };
        let card = ScoreCard {
            score,
            breakdown: ScoreBreakdown::default(),
            price_per_area: 10_000.0,
            market_median: 10_000.0,
            discount_pct: 0.0,
        };
        storage.upsert_listing(&ScoredListing { listing, card }).unwrap();
    }

    fn storage() -> SqliteStorage {
        let s = SqliteStorage::in_memory().unwrap();
        seed(&s, "1", "São Paulo", "Vila Mariana", 800_000.0, 2, 70, 1);
        seed(&s, "2", "São Paulo", "Vila Madalena", 1_200_000.0, 3, 40, 20);
        seed(&s, "3", "São Paulo", "Moema", 650_000.0, 2, 85, 10);
        seed(&s, "4", "Campinas", "Cambuí", 500_000.0, 1, 55, 5);
        s
    }

    fn ids(opps: &[Opportunity]) -> Vec<&str> {
        opps.iter().map(|o| o.listing.source_listing_id.as_str()).collect()
    }

    #[test]
    fn default_sort_is_score_descending() {
        let s = storage();
        let all = s.query_opportunities(&ListingQuery::default()).unwrap();
        assert_eq!(ids(&all), vec!["3", "1", "4", "2"]);
    }

    #[test]
    fn filters_combine() {
        let s = storage();
        let q = ListingQuery {
            city: Some("são paulo".into()),
            neighborhood: Some("vila".into()),
            bedrooms: vec![2, 3],
            sort: SortKey::PriceAsc,
            ..Default::default()
        };
        assert_eq!(ids(&s.query_opportunities(&q).unwrap()), vec!["1", "2"]);

        let q = ListingQuery {
            min_score: Some(60),
            max_price: Some(700_000.0),
            ..Default::default()
        };
        assert_eq!(ids(&s.query_opportunities(&q).unwrap()), vec!["3"]);
    }

    #[test]
    fn status_filter_and_newest_sort() {
        let s = storage();
        s.set_status(2, "viewed").unwrap();
        let q = ListingQuery {
            statuses: OpportunityStatus::parse_set("new").unwrap(),
            sort: SortKey::Newest,
            ..Default::default()
        };
        assert_eq!(ids(&s.query_opportunities(&q).unwrap()), vec!["3", "4", "1"]);
    }

    #[test]
    fn limit_is_capped_and_offset_pages() {
        let q = ListingQuery { limit: Some(10_000), ..Default::default() };
        assert_eq!(q.effective_limit(), MAX_LIMIT);
        assert_eq!(ListingQuery::default().effective_limit(), DEFAULT_LIMIT);

        let s = storage();
        let q = ListingQuery { limit: Some(2), offset: 2, ..Default::default() };
        assert_eq!(ids(&s.query_opportunities(&q).unwrap()), vec!["4", "2"]);
    }

    #[test]
    fn facets_respect_filters() {
        let s = storage();
        let f = s.facets(&ListingQuery { state: Some("SP".into()), ..Default::default() }).unwrap();
        assert_eq!(f.city[0], FacetValue { value: "São Paulo".into(), count: 3 });
        assert_eq!(f.city.len(), 2);
        assert_eq!(f.bedrooms[0], FacetValue { value: "2".into(), count: 2 });
        assert_eq!(f.status, vec![FacetValue { value: "new".into(), count: 4 }]);
        assert_eq!(f.price, Some(NumericRange { min: 500_000.0, max: 1_200_000.0 }));
        assert_eq!(f.score, Some(NumericRange { min: 40.0, max: 85.0 }));

        let empty = s.facets(&ListingQuery { city: Some("Recife".into()), ..Default::default() }).unwrap();
        assert!(empty.city.is_empty());
        assert_eq!(empty.price, None);
    }

    #[test]
    fn rejects_unknown_sort_and_bedrooms() {
        assert!("cheapest".parse::<SortKey>().is_err());
        assert_eq!(parse_bedrooms("2, 3").unwrap(), vec![2, 3]);
        assert!(parse_bedrooms("two").is_err());
    }
}
