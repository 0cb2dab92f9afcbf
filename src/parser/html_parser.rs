// Selector-driven HTML parsing for search and detail pages
use crate::config::SelectorConfig;
use crate::model::{ListingDetails, ListingSummary, ParserError};
use crate::parser::ListingParser;
use crate::utils::{parse_datetime, parse_locale_number};

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

struct Selectors {
    card: Selector,
    link: Selector,
    title: Selector,
    price: Selector,
    area: Selector,
    bedrooms: Selector,
    bathrooms: Selector,
    parking: Selector,
    condo_fee: Selector,
    property_tax: Selector,
    address: Selector,
    neighborhood: Selector,
    thumbnail: Selector,
    description: Selector,
    gallery_image: Selector,
    published_at: Selector,
}

pub struct HtmlListingParser {
    sel: Selectors,
    id_attr: String,
}

fn compile(css: &str) -> Result<Selector, ParserError> {
    Selector::parse(css).map_err(|e| ParserError::HtmlParseError(format!("selector '{}': {}", css, e)))
}

impl HtmlListingParser {
    pub fn new(config: &SelectorConfig) -> Result<Self, ParserError> {
        Ok(Self {
            sel: Selectors {
                card: compile(&config.card)?,
                link: compile(&config.link)?,
                title: compile(&config.title)?,
                price: compile(&config.price)?,
                area: compile(&config.area)?,
                bedrooms: compile(&config.bedrooms)?,
                bathrooms: compile(&config.bathrooms)?,
                parking: compile(&config.parking)?,
                condo_fee: compile(&config.condo_fee)?,
                property_tax: compile(&config.property_tax)?,
                address: compile(&config.address)?,
                neighborhood: compile(&config.neighborhood)?,
                thumbnail: compile(&config.thumbnail)?,
                description: compile(&config.description)?,
                gallery_image: compile(&config.gallery_image)?,
                published_at: compile(&config.published_at)?,
            },
            id_attr: config.id_attr.clone(),
        })
    }

    fn parse_card(&self, card: ElementRef<'_>, base: Option<&Url>) -> Option<ListingSummary> {
        let id = card.value().attr(&self.id_attr)?.trim().to_string();
        let href = first_attr(card, &self.sel.link, "href")?;
        let url = resolve(base, &href);
        let price = first_number(card, &self.sel.price).filter(|p| *p > 0.0);
        let Some(price) = price else {
            debug!(id = %id, "card without price, skipping");
            return None;
        };

        Some(ListingSummary {
            source_listing_id: id,
            url,
            title: first_text(card, &self.sel.title).unwrap_or_default(),
            price,
            area: first_number(card, &self.sel.area).unwrap_or(0.0),
            bedrooms: first_count(card, &self.sel.bedrooms),
            bathrooms: first_count(card, &self.sel.bathrooms),
            parking: first_count(card, &self.sel.parking),
            condo_fee: first_number(card, &self.sel.condo_fee),
            property_tax: first_number(card, &self.sel.property_tax),
            address: first_text(card, &self.sel.address).unwrap_or_default(),
            neighborhood: first_text(card, &self.sel.neighborhood).unwrap_or_default(),
            city: String::new(),
            state: String::new(),
            thumbnail_url: first_attr(card, &self.sel.thumbnail, "src").map(|src| resolve(base, &src)),
        })
    }
}

impl ListingParser for HtmlListingParser {
    fn parse_search(&self, html: &str, page_url: &str) -> Result<Vec<ListingSummary>, ParserError> {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();

        let summaries = document
            .select(&self.sel.card)
            .filter_map(|card| self.parse_card(card, base.as_ref()))
            .collect();
        Ok(summaries)
    }

    fn parse_detail(&self, html: &str, summary: &ListingSummary) -> Result<ListingDetails, ParserError> {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let base = Url::parse(&summary.url).ok();

        let description = first_text(root, &self.sel.description);
        let images: Vec<String> = root
            .select(&self.sel.gallery_image)
            .filter_map(|img| img.value().attr("src"))
            .map(|src| resolve(base.as_ref(), src))
            .collect();
        let published_at = first_attr(root, &self.sel.published_at, "datetime")
            .as_deref()
            .and_then(parse_datetime);

        if description.is_none() && images.is_empty() && published_at.is_none() {
            return Err(ParserError::MissingField("description".to_string()));
        }

        let mut merged = summary.clone();
        if let Some(title) = first_text(root, &self.sel.title) {
            merged.title = title;
        }
        if let Some(price) = first_number(root, &self.sel.price).filter(|p| *p > 0.0) {
            merged.price = price;
        }
        if let Some(area) = first_number(root, &self.sel.area).filter(|a| *a > 0.0) {
            merged.area = area;
        }
        merged.condo_fee = first_number(root, &self.sel.condo_fee).or(merged.condo_fee);
        merged.property_tax = first_number(root, &self.sel.property_tax).or(merged.property_tax);
        if let Some(address) = first_text(root, &self.sel.address) {
            merged.address = address;
        }

        let images = if images.is_empty() {
            summary.thumbnail_url.iter().cloned().collect()
        } else {
            images
        };

        Ok(ListingDetails {
            summary: merged,
            description: description.unwrap_or_default(),
            images,
            published_at,
            degraded: false,
        })
    }
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().and_then(|n| {
        let text = n.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() { None } else { Some(text) }
    })
}

fn first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn first_number(scope: ElementRef<'_>, selector: &Selector) -> Option<f64> {
    first_text(scope, selector).as_deref().and_then(parse_locale_number)
}

fn first_count(scope: ElementRef<'_>, selector: &Selector) -> u32 {
    first_number(scope, selector).map(|n| n as u32).unwrap_or(0)
}
