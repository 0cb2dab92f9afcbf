use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub settle_delay_ms: u64,
    /// Pages that parse to zero listings are dumped here when set.
    pub debug_html_dir: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://listings.example.com/venda/imoveis".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ImovelSniperBot/0.1".to_string(),
            timeout_seconds: 30,
            settle_delay_ms: 1500,
            debug_html_dir: None,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[cfg(feature = "browser")]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub concurrency: usize,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            jitter_min_ms: 1000,
            jitter_max_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub default_max_results: usize,
    pub hard_max_results: usize,
    pub run_deadline_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_max_results: 30,
            hard_max_results: 100,
            run_deadline_seconds: 600,
        }
    }
}

impl LimitsConfig {
    /// Applies the default when absent and clamps to the hard maximum.
    pub fn effective_max(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|n| *n > 0)
            .unwrap_or(self.default_max_results)
            .min(self.hard_max_results)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub discount_weight: f64,
    pub max_discount_points: i32,
    pub urgency_keywords: Vec<String>,
    pub urgency_points: i32,
    pub max_urgency_points: i32,
    pub risk_keywords: Vec<String>,
    pub risk_points: i32,
    pub max_risk_points: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            discount_weight: 1.0,
            max_discount_points: 50,
            urgency_keywords: words(&[
                "urgente",
                "oportunidade",
                "abaixo do mercado",
                "abaixo da avaliação",
                "aceita proposta",
                "venda rápida",
                "motivo viagem",
                "preço de ocasião",
            ]),
            urgency_points: 5,
            max_urgency_points: 15,
            risk_keywords: words(&[
                "leilão",
                "leilao",
                "inventário",
                "usufruto",
                "ocupado",
                "sem escritura",
                "precisa de reforma",
                "não financia",
            ]),
            risk_points: 10,
            max_risk_points: 30,
        }
    }
}

/// CSS selectors for the HTML listing parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub card: String,
    pub id_attr: String,
    pub link: String,
    pub title: String,
    pub price: String,
    pub area: String,
    pub bedrooms: String,
    pub bathrooms: String,
    pub parking: String,
    pub condo_fee: String,
    pub property_tax: String,
    pub address: String,
    pub neighborhood: String,
    pub thumbnail: String,
    pub description: String,
    pub gallery_image: String,
    pub published_at: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let field = |name: &str| format!("[data-field=\"{}\"]", name);
        Self {
            card: "[data-listing-id]".to_string(),
            id_attr: "data-listing-id".to_string(),
            link: "a[href]".to_string(),
            title: field("title"),
            price: field("price"),
            area: field("area"),
            bedrooms: field("bedrooms"),
            bathrooms: field("bathrooms"),
            parking: field("parking"),
            condo_fee: field("condo-fee"),
            property_tax: field("property-tax"),
            address: field("address"),
            neighborhood: field("neighborhood"),
            thumbnail: "img[src]".to_string(),
            description: field("description"),
            gallery_image: format!("{} img[src]", field("gallery")),
            published_at: "time[datetime]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub source: String,
    pub fetch: FetchConfig,
    pub enrichment: EnrichmentConfig,
    pub limits: LimitsConfig,
    pub scoring: ScoringConfig,
    pub selectors: SelectorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "data.db".to_string(),
            source: "listings".to_string(),
            fetch: FetchConfig::default(),
            enrichment: EnrichmentConfig::default(),
            limits: LimitsConfig::default(),
            scoring: ScoringConfig::default(),
            selectors: SelectorConfig::default(),
        }
    }
}

/// Loads the JSON config. A missing file yields the defaults.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    if !Path::new(path).exists() {
        info!("Config file {} not found, using defaults", path);
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
