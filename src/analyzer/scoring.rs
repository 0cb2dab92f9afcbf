// Opportunity scoring: independent integer contributions, clamped to 0..=100
use crate::config::ScoringConfig;
use crate::model::{NormalizedListing, ScoreBreakdown, ScoreCard};
use chrono::{DateTime, Utc};

/// Inputs fixed once per run so scoring stays a pure function.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext {
    pub median_price_per_area: f64,
    pub as_of: DateTime<Utc>,
}

pub trait ScoringPolicy: Send + Sync {
    fn breakdown(&self, listing: &NormalizedListing, ctx: &ScoringContext) -> ScoreBreakdown;

    fn score(&self, listing: &NormalizedListing, ctx: &ScoringContext) -> ScoreCard {
        let breakdown = self.breakdown(listing, ctx);
        ScoreCard {
            score: clamp_score(breakdown.total()),
            breakdown,
            price_per_area: listing.price_per_area.unwrap_or(0.0),
            market_median: ctx.median_price_per_area,
            discount_pct: discount_pct(listing.price_per_area, ctx.median_price_per_area),
        }
    }
}

pub fn clamp_score(total: i32) -> u8 {
    total.clamp(0, 100) as u8
}

/// `(median - price_per_area) / median`, signed. Zero when either side is undefined.
pub fn discount_pct(price_per_area: Option<f64>, median: f64) -> f64 {
    match price_per_area {
        Some(ppa) if median > 0.0 => (median - ppa) / median,
        _ => 0.0,
    }
}

pub struct DefaultScoringPolicy {
    config: ScoringConfig,
    urgency: Vec<String>,
    risk: Vec<String>,
}

impl DefaultScoringPolicy {
    pub fn new(config: ScoringConfig) -> Self {
        let lower = |words: &[String]| words.iter().map(|w| w.to_lowercase()).collect();
        Self {
            urgency: lower(&config.urgency_keywords),
            risk: lower(&config.risk_keywords),
            config,
        }
    }

    fn discount_points(&self, pct: f64) -> i32 {
        if pct <= 0.0 {
            return 0;
        }
        let raw = (pct * 100.0 * self.config.discount_weight).round() as i32;
        raw.clamp(0, self.config.max_discount_points)
    }

    fn keyword_points(&self, text: &str) -> (i32, i32) {
        let hits = |words: &[String]| words.iter().filter(|w| text.contains(w.as_str())).count() as i32;
        let bonus = (hits(&self.urgency) * self.config.urgency_points).min(self.config.max_urgency_points);
        let penalty = (hits(&self.risk) * self.config.risk_points).min(self.config.max_risk_points);
        (bonus, -penalty)
    }
}

impl ScoringPolicy for DefaultScoringPolicy {
    fn breakdown(&self, listing: &NormalizedListing, ctx: &ScoringContext) -> ScoreBreakdown {
        let pct = discount_pct(listing.price_per_area, ctx.median_price_per_area);
        let text = format!("{} {}", listing.title, listing.description).to_lowercase();
        let (keywords, penalties) = self.keyword_points(&text);

        ScoreBreakdown {
            discount: self.discount_points(pct),
            area: area_points(listing.area),
            bedrooms: bedroom_points(listing.bedrooms),
            parking: parking_points(listing.parking),
            keywords,
            penalties,
            time_decay: time_decay(listing.published_at, ctx.as_of),
        }
    }
}

fn area_points(area: f64) -> i32 {
    match area {
        a if (50.0..=150.0).contains(&a) => 10,
        a if (35.0..50.0).contains(&a) || (a > 150.0 && a <= 250.0) => 5,
        _ => 0,
    }
}

fn bedroom_points(bedrooms: u32) -> i32 {
    match bedrooms {
        0 => 0,
        1 => 3,
        2 => 8,
        3 => 10,
        _ => 6,
    }
}

fn parking_points(parking: u32) -> i32 {
    match parking {
        0 => 0,
        1 => 5,
        _ => 8,
    }
}

fn time_decay(published_at: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> i32 {
    let Some(published) = published_at else {
        return 0;
    };
    match (as_of - published).num_days() {
        d if d <= 7 => 0,
        d if d <= 30 => -5,
        d if d <= 90 => -10,
        _ => -15,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ctx(median: f64) -> ScoringContext {
        ScoringContext {
            median_price_per_area: median,
            as_of: Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap(),
        }
    }

    fn listing(price: f64, area: f64) -> NormalizedListing {
        NormalizedListing {
            source_listing_id: "1".into(),
            title: "Apartamento".into(),
            price,
            area,
            price_per_area: crate::normalizer::price_per_area(price, area),
            ..Default::default()
        }
    }

    fn policy() -> DefaultScoringPolicy {
        DefaultScoringPolicy::new(ScoringConfig::default())
    }

    #[test]
    fn discount_contribution_tracks_distance_below_median() {
        let l = listing(700_000.0, 100.0);
        let card = policy().score(&l, &ctx(10_000.0));
        assert!((card.discount_pct - 0.3).abs() < 1e-9);
        assert_eq!(card.breakdown.discount, 30);
        assert_eq!(card.breakdown.area, 10);
        assert_eq!(card.price_per_area, 7_000.0);
        assert_eq!(card.market_median, 10_000.0);
    }

    #[test]
    fn above_median_reports_negative_pct_and_no_discount_points() {
        let card = policy().score(&listing(1_200_000.0, 100.0), &ctx(10_000.0));
        assert!(card.discount_pct < 0.0);
        assert_eq!(card.breakdown.discount, 0);
    }

    #[test]
    fn zero_median_or_area_yields_no_discount() {
        let card = policy().score(&listing(500_000.0, 0.0), &ctx(10_000.0));
        assert_eq!(card.discount_pct, 0.0);
        assert_eq!(card.price_per_area, 0.0);
        let card = policy().score(&listing(500_000.0, 50.0), &ctx(0.0));
        assert_eq!(card.breakdown.discount, 0);
    }

    #[test]
    fn keywords_are_capped_both_ways() {
        let mut l = listing(500_000.0, 100.0);
        l.description = "URGENTE! Oportunidade, aceita proposta, venda rápida".into();
        let b = policy().breakdown(&l, &ctx(5_000.0));
        assert_eq!(b.keywords, 15);

        l.description = "leilão, inventário, usufruto, ocupado, sem escritura".into();
        let b = policy().breakdown(&l, &ctx(5_000.0));
        assert_eq!(b.penalties, -30);
    }

    #[test]
    fn older_listings_decay() {
        let c = ctx(5_000.0);
        let mut l = listing(500_000.0, 100.0);
        l.published_at = Some(c.as_of - Duration::days(3));
        assert_eq!(policy().breakdown(&l, &c).time_decay, 0);
        l.published_at = Some(c.as_of - Duration::days(20));
        assert_eq!(policy().breakdown(&l, &c).time_decay, -5);
        l.published_at = Some(c.as_of - Duration::days(400));
        assert_eq!(policy().breakdown(&l, &c).time_decay, -15);
    }

    #[test]
    fn score_is_clamped_at_both_ends() {
        assert_eq!(clamp_score(-80), 0);
        assert_eq!(clamp_score(250), 100);
        assert_eq!(clamp_score(42), 42);

        let mut worst = listing(2_000_000.0, 10.0);
        worst.description = "leilão ocupado sem escritura não financia".into();
        worst.published_at = Some(ctx(1.0).as_of - Duration::days(365));
        assert_eq!(policy().score(&worst, &ctx(1_000.0)).score, 0);

        let mut best = listing(100_000.0, 100.0);
        best.bedrooms = 3;
        best.parking = 2;
        best.description = "urgente oportunidade aceita proposta".into();
        let card = policy().score(&best, &ctx(100_000.0));
        assert!(card.breakdown.total() > 80);
        assert!(card.score <= 100);
    }

    #[test]
    fn scoring_is_deterministic() {
        let l = listing(450_000.0, 75.0);
        assert_eq!(policy().score(&l, &ctx(7_000.0)), policy().score(&l, &ctx(7_000.0)));
    }
}
