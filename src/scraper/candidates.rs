// Search-result URL guesses for a state/city/neighborhood triple
use crate::utils::slugify;
use std::collections::HashSet;

pub const DEFAULT_STATE: &str = "sp";

/// Long-form neighborhood prefixes and the abbreviations the source also indexes under.
const PREFIX_ALIASES: &[(&str, &str)] = &[("vila-", "vl-"), ("jardim-", "jd-"), ("parque-", "pq-")];

/// Cities whose result URLs are segmented by zone.
const ZONED_CITIES: &[(&str, &str, &[&str])] = &[
    ("sp", "sao-paulo", &["zona-sul", "zona-oeste", "zona-norte", "zona-leste", "centro"]),
    ("rj", "rio-de-janeiro", &["zona-sul", "zona-oeste", "zona-norte", "centro"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub state: String,
    pub city: String,
    pub neighborhood: String,
}

impl Location {
    pub fn normalize(state: &str, city: &str, neighborhood: &str) -> Self {
        let state = slugify(state);
        Self {
            state: if state.is_empty() { DEFAULT_STATE.to_string() } else { state },
            city: slugify(city),
            neighborhood: slugify(neighborhood),
        }
    }
}

pub struct CandidateBuilder {
    base_url: String,
}

impl CandidateBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Ordered, deduplicated candidate URLs. Identical input always yields the same list.
    pub fn build(&self, state: &str, city: &str, neighborhood: &str) -> Vec<String> {
        let loc = Location::normalize(state, city, neighborhood);
        let variants = neighborhood_variants(&loc.neighborhood);
        let mut urls = Vec::new();

        if variants.is_empty() {
            urls.push(self.url(&format!("{}+{}", loc.state, loc.city)));
        }

        for variant in &variants {
            urls.push(self.url(&format!("{}+{}+{}", loc.state, loc.city, variant)));
            urls.push(self.url(&format!("{}+{}++{}", loc.state, loc.city, variant)));
        }

        for zone in zones_for(&loc.state, &loc.city) {
            for variant in &variants {
                urls.push(self.url(&format!("{}+{}+{}+{}", loc.state, loc.city, zone, variant)));
            }
        }

        dedup_preserving_order(urls)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/", self.base_url, path)
    }
}

/// The slug itself first, then its prefix alias (long ↔ short) if one applies.
pub fn neighborhood_variants(slug: &str) -> Vec<String> {
    if slug.is_empty() {
        return Vec::new();
    }
    let mut variants = vec![slug.to_string()];
    for (long, short) in PREFIX_ALIASES {
        if let Some(rest) = slug.strip_prefix(long) {
            variants.push(format!("{}{}", short, rest));
        } else if let Some(rest) = slug.strip_prefix(short) {
            variants.push(format!("{}{}", long, rest));
        }
    }
    dedup_preserving_order(variants)
}

fn zones_for(state: &str, city: &str) -> &'static [&'static str] {
    ZONED_CITIES
        .iter()
        .find(|(s, c, _)| *s == state && *c == city)
        .map(|(_, _, zones)| *zones)
        .unwrap_or(&[])
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://listings.example.com/venda/imoveis/";

    #[test]
    fn build_is_deterministic() {
        let builder = CandidateBuilder::new(BASE);
        let a = builder.build("SP", "São Paulo", "Vila Mariana");
        let b = builder.build("SP", "São Paulo", "Vila Mariana");
        assert_eq!(a, b);
        let unique: HashSet<_> = a.iter().collect();
        assert_eq!(unique.len(), a.len());
    }

    #[test]
    fn plain_city_emits_both_separator_forms_per_variant() {
        let builder = CandidateBuilder::new(BASE);
        let urls = builder.build("mg", "Belo Horizonte", "Savassi");
        assert_eq!(
            urls,
            vec![
                "https://listings.example.com/venda/imoveis/mg+belo-horizonte+savassi/",
                "https://listings.example.com/venda/imoveis/mg+belo-horizonte++savassi/",
            ]
        );
    }

    #[test]
    fn alias_expansion_is_symmetric() {
        let builder = CandidateBuilder::new(BASE);
        let long = builder.build("pr", "Curitiba", "Vila Izabel");
        let short = builder.build("pr", "Curitiba", "Vl Izabel");
        for urls in [&long, &short] {
            assert!(urls.iter().any(|u| u.ends_with("+vila-izabel/")));
            assert!(urls.iter().any(|u| u.ends_with("+vl-izabel/")));
        }
        assert_eq!(neighborhood_variants("jd-europa"), vec!["jd-europa", "jardim-europa"]);
    }

    #[test]
    fn zoned_city_crosses_zones_with_variants() {
        let builder = CandidateBuilder::new(BASE);
        let urls = builder.build("sp", "sao paulo", "jardim paulista");
        // 2 variants x 2 separator forms + 5 zones x 2 variants
        assert_eq!(urls.len(), 14);
        assert_eq!(urls[0], format!("{}sp+sao-paulo+jardim-paulista/", BASE));
        assert!(urls.contains(&format!("{}sp+sao-paulo+zona-sul+jd-paulista/", BASE)));
        assert!(urls.contains(&format!("{}sp+sao-paulo+centro+jardim-paulista/", BASE)));
    }

    #[test]
    fn blank_state_defaults() {
        let loc = Location::normalize("  ", "Campinas", "Cambuí");
        assert_eq!(loc.state, DEFAULT_STATE);
        assert_eq!(loc.neighborhood, "cambui");
    }
}
