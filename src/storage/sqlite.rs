use crate::model::{
    NormalizedListing, Opportunity, OpportunityStatus, ScoreBreakdown, ScoredListing, StorageError,
};
use crate::utils::{format_ts, parse_datetime};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

pub struct SqliteStorage {
    pub(super) conn: Connection,
}

/// Column list shared by every query that returns `Opportunity` rows.
pub(super) const OPPORTUNITY_COLUMNS: &str = "
    o.id, o.listing_id, o.score, o.breakdown, o.price_per_area, o.market_median, o.discount_pct,
    o.status, l.first_seen_at, l.last_seen_at, l.source, l.source_listing_id, l.url, l.title,
    l.description, l.price, l.area, l.bedrooms, l.bathrooms, l.parking, l.condo_fee,
    l.property_tax, l.address, l.neighborhood, l.city, l.state, l.thumbnail_url, l.images,
    l.published_at";

pub(super) const OPPORTUNITY_FROM: &str =
    "FROM opportunities o JOIN source_listings l ON l.id = o.listing_id";

impl SqliteStorage {
    /// Opens the database file and brings the schema up to date.
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        Ok(self.conn.execute_batch(sql)?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS source_listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                source_listing_id TEXT NOT NULL CHECK (source_listing_id <> ''),
                url TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                price REAL NOT NULL CHECK (price >= 0),
                area REAL NOT NULL DEFAULT 0,
                bedrooms INTEGER NOT NULL DEFAULT 0,
                bathrooms INTEGER NOT NULL DEFAULT 0,
                parking INTEGER NOT NULL DEFAULT 0,
                condo_fee REAL,
                address TEXT NOT NULL DEFAULT '',
                neighborhood TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                thumbnail_url TEXT,
                images TEXT NOT NULL DEFAULT '[]',
                published_at TEXT,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                UNIQUE (source, source_listing_id)
            );

            CREATE TABLE IF NOT EXISTS opportunities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id INTEGER NOT NULL UNIQUE REFERENCES source_listings(id),
                score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
                breakdown TEXT NOT NULL,
                price_per_area REAL NOT NULL DEFAULT 0,
                market_median REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_name TEXT NOT NULL,
                status TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                triggered_by TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                params TEXT NOT NULL DEFAULT '{}',
                stats TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_listings_location ON source_listings (state, city);
            CREATE INDEX IF NOT EXISTS idx_opportunities_score ON opportunities (score DESC);
            ",
        )?;

        // Columns added after the first schema version
        Self::migrate_add_column_if_missing(&conn, "source_listings", "property_tax", "REAL")?;
        Self::migrate_add_column_if_missing(&conn, "opportunities", "discount_pct", "REAL NOT NULL DEFAULT 0")?;

        Ok(Self { conn })
    }

    /// Adds the column when an older database lacks it.
    fn migrate_add_column_if_missing(
        conn: &Connection,
        table: &str,
        column: &str,
        column_def: &str,
    ) -> Result<(), StorageError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing_columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        if !existing_columns.iter().any(|c| c == column) {
            debug!(table, column, "adding missing column");
            let alter_sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def);
            conn.execute(&alter_sql, [])?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn upsert_listing(&self, scored: &ScoredListing) -> Result<bool, StorageError> {
        self.upsert_listing_at(scored, Utc::now())
    }

    /// Inserts or updates the listing and its opportunity in one transaction.
    /// Returns `true` when the listing was not seen before. Status survives re-ingestion.
    pub fn upsert_listing_at(&self, scored: &ScoredListing, now: DateTime<Utc>) -> Result<bool, StorageError> {
        let l = &scored.listing;
        let card = &scored.card;
        let now = format_ts(&now);
        let images = serde_json::to_string(&l.images)?;
        let breakdown = serde_json::to_string(&card.breakdown)?;
        let published_at = l.published_at.as_ref().map(format_ts);

        let tx = self.conn.unchecked_transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM source_listings WHERE source = ?1 AND source_listing_id = ?2",
                params![l.source, l.source_listing_id],
                |row| row.get(0),
            )
            .optional()?;

        let listing_id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE source_listings SET
                        url = ?1, title = ?2, description = ?3, price = ?4, area = ?5,
                        bedrooms = ?6, bathrooms = ?7, parking = ?8, condo_fee = ?9, property_tax = ?10,
                        address = ?11, neighborhood = ?12, city = ?13, state = ?14, thumbnail_url = ?15,
                        images = ?16, published_at = ?17, last_seen_at = ?18
                     WHERE id = ?19",
                    params![
                        l.url, l.title, l.description, l.price, l.area,
                        l.bedrooms, l.bathrooms, l.parking, l.condo_fee, l.property_tax,
                        l.address, l.neighborhood, l.city, l.state, l.thumbnail_url,
                        images, published_at, now, id,
                    ],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO source_listings (
                        source, source_listing_id, url, title, description, price, area,
                        bedrooms, bathrooms, parking, condo_fee, property_tax,
                        address, neighborhood, city, state, thumbnail_url,
                        images, published_at, first_seen_at, last_seen_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)",
                    params![
                        l.source, l.source_listing_id, l.url, l.title, l.description, l.price, l.area,
                        l.bedrooms, l.bathrooms, l.parking, l.condo_fee, l.property_tax,
                        l.address, l.neighborhood, l.city, l.state, l.thumbnail_url,
                        images, published_at, now,
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.execute(
            "INSERT INTO opportunities (
                listing_id, score, breakdown, price_per_area, market_median, discount_pct,
                status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'new', ?7, ?7)
             ON CONFLICT (listing_id) DO UPDATE SET
                score = excluded.score,
                breakdown = excluded.breakdown,
                price_per_area = excluded.price_per_area,
                market_median = excluded.market_median,
                discount_pct = excluded.discount_pct,
                updated_at = excluded.updated_at",
            params![
                listing_id,
                card.score,
                breakdown,
                card.price_per_area,
                card.market_median,
                card.discount_pct,
                now,
            ],
        )?;

        tx.commit()?;
        Ok(existing.is_none())
    }

    /// Validates `raw` against the allowed statuses before writing anything.
    pub fn set_status(&self, opportunity_id: i64, raw: &str) -> Result<Opportunity, StorageError> {
        let status: OpportunityStatus = raw.parse()?;
        let changed = self.conn.execute(
            "UPDATE opportunities SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), format_ts(&Utc::now()), opportunity_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        self.get_opportunity(opportunity_id)?.ok_or(StorageError::NotFound)
    }

    pub fn get_opportunity(&self, opportunity_id: i64) -> Result<Option<Opportunity>, StorageError> {
        let sql = format!("SELECT {} {} WHERE o.id = ?1", OPPORTUNITY_COLUMNS, OPPORTUNITY_FROM);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![opportunity_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_opportunity(row)?)),
            None => Ok(None),
        }
    }

    pub(super) fn map_opportunity(row: &Row) -> Result<Opportunity, StorageError> {
        let breakdown: ScoreBreakdown = serde_json::from_str(&row.get::<_, String>(3)?)?;
        let status: String = row.get(7)?;
        let status = status
            .parse::<OpportunityStatus>()
            .map_err(|_| StorageError::Corrupt(format!("unknown opportunity status '{}'", status)))?;
        let images: Vec<String> = serde_json::from_str(&row.get::<_, String>(27)?)?;
        let published_at = row
            .get::<_, Option<String>>(28)?
            .map(|s| parse_ts(&s))
            .transpose()?;
        let score: i64 = row.get(2)?;

        let listing = NormalizedListing {
            source: row.get(10)?,
            source_listing_id: row.get(11)?,
            url: row.get(12)?,
            title: row.get(13)?,
            description: row.get(14)?,
            price: row.get(15)?,
            area: row.get(16)?,
            bedrooms: row.get(17)?,
            bathrooms: row.get(18)?,
            parking: row.get(19)?,
            condo_fee: row.get(20)?,
            property_tax: row.get(21)?,
            address: row.get(22)?,
            neighborhood: row.get(23)?,
            city: row.get(24)?,
            state: row.get(25)?,
            thumbnail_url: row.get(26)?,
            images,
            published_at,
            price_per_area: None,
        };
        let price_per_area: f64 = row.get(4)?;

        Ok(Opportunity {
            id: row.get(0)?,
            listing_id: row.get(1)?,
            listing: NormalizedListing {
                price_per_area: (price_per_area > 0.0).then_some(price_per_area),
                ..listing
            },
            score: score.clamp(0, 100) as u8,
            breakdown,
            price_per_area,
            market_median: row.get(5)?,
            discount_pct: row.get(6)?,
            status,
            first_seen_at: parse_ts(&row.get::<_, String>(8)?)?,
            last_seen_at: parse_ts(&row.get::<_, String>(9)?)?,
        })
    }
}

pub(super) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    parse_datetime(raw).ok_or_else(|| StorageError::Corrupt(format!("invalid timestamp '{}'", raw)))
}
