use crate::model::{ListingDetails, NormalizedListing};

pub fn normalize_all(details: &[ListingDetails], source: &str) -> Vec<NormalizedListing> {
    details.iter().map(|d| normalize_listing(d, source)).collect()
}

/// Flattens details into the stored shape and attaches price per square metre.
pub fn normalize_listing(details: &ListingDetails, source: &str) -> NormalizedListing {
    let s = &details.summary;
    NormalizedListing {
        source: source.to_string(),
        source_listing_id: s.source_listing_id.clone(),
        url: s.url.clone(),
        title: s.title.trim().to_string(),
        description: details.description.trim().to_string(),
        price: s.price,
        area: s.area,
        bedrooms: s.bedrooms,
        bathrooms: s.bathrooms,
        parking: s.parking,
        condo_fee: s.condo_fee,
        property_tax: s.property_tax,
        address: s.address.clone(),
        neighborhood: s.neighborhood.clone(),
        city: s.city.clone(),
        state: s.state.clone(),
        thumbnail_url: s.thumbnail_url.clone(),
        images: details.images.clone(),
        published_at: details.published_at,
        price_per_area: price_per_area(s.price, s.area),
    }
}

pub fn price_per_area(price: f64, area: f64) -> Option<f64> {
    if area > 0.0 && price.is_finite() && area.is_finite() {
        Some(price / area)
    } else {
        None
    }
}
