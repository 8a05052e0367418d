// 📊 Completeness Scorer - how much useful information a venue carries
// Pure function of field presence; picks the keeper of a duplicate group.

use std::cmp::Ordering;

use crate::db::{present, Venue};

// ============================================================================
// RUBRIC
// ============================================================================

const COORDINATES: u32 = 10;
const POSTAL_CODE: u32 = 3;
const STATE: u32 = 2;
const ADDRESS_HAS_DIGIT: u32 = 15;
const ADDRESS_NOT_NAME: u32 = 10;
const ADDRESS_LENGTH_CAP: u32 = 10;
const DESCRIPTION: u32 = 20;
const EXTERIOR_PHOTO: u32 = 15;
const INTERIOR_PHOTO: u32 = 10;
const STRIP_PHOTO: u32 = 15;
const MACHINE_TYPE: u32 = 8;
const PHOTO_TYPE: u32 = 5;
const MACHINE_MODEL: u32 = 8;
const MANUFACTURER: u32 = 5;
const HOURS: u32 = 7;
const COST: u32 = 5;
const FEATURES: u32 = 5;
const SOURCE_URL_EACH: u32 = 3;
const SOURCE_URL_CAP: u32 = 10;
const GEOCODED: u32 = 5;
const ORIGINAL_SLUG: u32 = 12;

fn points(condition: bool, value: u32) -> u32 {
    if condition {
        value
    } else {
        0
    }
}

/// Deterministic, non-negative completeness score
pub fn completeness_score(venue: &Venue) -> u32 {
    let mut score = 0;

    score += points(venue.coordinates().is_some(), COORDINATES);
    score += points(present(&venue.postal_code).is_some(), POSTAL_CODE);
    score += points(present(&venue.state).is_some(), STATE);

    if let Some(address) = present(&venue.address) {
        score += points(address.chars().any(|c| c.is_ascii_digit()), ADDRESS_HAS_DIGIT);
        score += points(
            address.to_lowercase() != venue.name.trim().to_lowercase(),
            ADDRESS_NOT_NAME,
        );
        let length = u32::try_from(address.chars().count()).unwrap_or(u32::MAX);
        score += (length / 10).min(ADDRESS_LENGTH_CAP);
    }

    score += points(present(&venue.description).is_some(), DESCRIPTION);
    score += points(present(&venue.exterior_photo).is_some(), EXTERIOR_PHOTO);
    score += points(present(&venue.interior_photo).is_some(), INTERIOR_PHOTO);
    score += points(
        venue.strip_photos.iter().any(|p| !p.trim().is_empty()),
        STRIP_PHOTO,
    );

    score += points(present(&venue.machine_type).is_some(), MACHINE_TYPE);
    score += points(present(&venue.photo_type).is_some(), PHOTO_TYPE);
    score += points(present(&venue.machine_model).is_some(), MACHINE_MODEL);
    score += points(present(&venue.manufacturer).is_some(), MANUFACTURER);

    score += points(present(&venue.hours).is_some(), HOURS);
    score += points(present(&venue.cost).is_some(), COST);
    score += points(!venue.features.is_empty(), FEATURES);

    let urls = u32::try_from(venue.source_urls.len()).unwrap_or(u32::MAX);
    score += urls.saturating_mul(SOURCE_URL_EACH).min(SOURCE_URL_CAP);

    score += points(venue.geocoded_at.is_some(), GEOCODED);
    score += points(!venue.has_numbered_slug(), ORIGINAL_SLUG);

    score
}

// ============================================================================
// KEEPER SELECTION
// ============================================================================

/// Ordering of two candidates, best first: higher score, then earlier
/// creation (missing timestamps last), then smaller id.
fn keeper_order(a: (&Venue, u32), b: (&Venue, u32)) -> Ordering {
    b.1.cmp(&a.1)
        .then_with(|| match (a.0.created_at, b.0.created_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.0.id.cmp(&b.0.id))
}

/// Index and score of the keeper, or None for an empty slice
pub fn select_keeper(members: &[Venue]) -> Option<(usize, u32)> {
    members
        .iter()
        .enumerate()
        .map(|(idx, venue)| (idx, venue, completeness_score(venue)))
        .min_by(|a, b| keeper_order((a.1, a.2), (b.1, b.2)))
        .map(|(idx, _, score)| (idx, score))
}
