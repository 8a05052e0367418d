// 🔗 Merge Resolver - fold a duplicate group into its keeper
// Pure transformation: no store access. Produces the payload the executor writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::{present, Venue};
use crate::normalize::has_street_content;

/// Coordinate pair with the timestamp of the geocode that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub geocoded_at: Option<DateTime<Utc>>,
}

/// Fields written to the keeper. Anything not listed here is never touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedPayload {
    // Scalar informational fields: keeper first, else first non-keeper
    pub machine_type: Option<String>,
    pub machine_model: Option<String>,
    pub manufacturer: Option<String>,
    pub photo_type: Option<String>,
    pub hours: Option<String>,
    pub cost: Option<String>,

    /// All distinct descriptions, blank-line separated
    pub description: Option<String>,

    // Photos: keeper first, else first non-keeper
    pub exterior_photo: Option<String>,
    pub interior_photo: Option<String>,
    pub ai_preview: Option<String>,

    // Set-valued: union, de-duplicated
    pub strip_photos: Vec<String>,
    pub source_names: Vec<String>,
    pub source_urls: Vec<String>,
    pub features: Vec<String>,

    // Location gap-fill: only when the keeper has none
    /// Street-level address from a member when the keeper's address has no street content
    #[serde(default)]
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
    pub coordinates: Option<Coordinates>,
}

impl MergedPayload {
    /// Write the payload onto a record. None leaves the record's value alone;
    /// list values are appended to whatever the record holds now.
    pub fn apply_to(&self, venue: &mut Venue) {
        fn set(target: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }

        fn append(target: &mut Vec<String>, values: &[String]) {
            let mut seen = HashSet::new();
            *target = target
                .iter()
                .chain(values.iter())
                .map(|value| value.trim())
                .filter(|value| !value.is_empty() && seen.insert(value.to_string()))
                .map(str::to_string)
                .collect();
        }

        set(&mut venue.machine_type, &self.machine_type);
        set(&mut venue.machine_model, &self.machine_model);
        set(&mut venue.manufacturer, &self.manufacturer);
        set(&mut venue.photo_type, &self.photo_type);
        set(&mut venue.hours, &self.hours);
        set(&mut venue.cost, &self.cost);
        set(&mut venue.description, &self.description);
        set(&mut venue.exterior_photo, &self.exterior_photo);
        set(&mut venue.interior_photo, &self.interior_photo);
        set(&mut venue.ai_preview, &self.ai_preview);
        set(&mut venue.address, &self.address);
        set(&mut venue.postal_code, &self.postal_code);
        set(&mut venue.state, &self.state);

        append(&mut venue.strip_photos, &self.strip_photos);
        append(&mut venue.source_names, &self.source_names);
        append(&mut venue.source_urls, &self.source_urls);
        append(&mut venue.features, &self.features);

        if let Some(coords) = &self.coordinates {
            venue.latitude = Some(coords.latitude);
            venue.longitude = Some(coords.longitude);
            venue.geocoded_at = coords.geocoded_at.or(venue.geocoded_at);
        }
    }
}

// ============================================================================
// FIELD POLICIES
// ============================================================================

fn first_present(
    keeper: &Venue,
    others: &[&Venue],
    field: fn(&Venue) -> &Option<String>,
) -> Option<String> {
    std::iter::once(keeper)
        .chain(others.iter().copied())
        .find_map(|v| present(field(v)))
        .map(str::to_string)
}

fn union(keeper: &Venue, others: &[&Venue], field: fn(&Venue) -> &Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(keeper)
        .chain(others.iter().copied())
        .flat_map(|v| field(v).iter())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty() && seen.insert(value.to_string()))
        .map(str::to_string)
        .collect()
}

fn merge_descriptions(keeper: &Venue, others: &[&Venue]) -> Option<String> {
    let mut distinct: Vec<&str> = Vec::new();
    for venue in std::iter::once(keeper).chain(others.iter().copied()) {
        if let Some(text) = present(&venue.description) {
            if !distinct.contains(&text) {
                distinct.push(text);
            }
        }
    }

    if distinct.is_empty() {
        None
    } else {
        Some(distinct.join("\n\n"))
    }
}

/// Keeper's address unless it is missing or city-level and a member has a street address
fn merge_address(keeper: &Venue, others: &[&Venue]) -> Option<String> {
    let street = |v: &Venue| has_street_content(v.address.as_deref(), &v.city, 1);
    if street(keeper) {
        return present(&keeper.address).map(str::to_string);
    }

    others
        .iter()
        .copied()
        .find(|v| street(*v))
        .and_then(|v| present(&v.address))
        .or_else(|| present(&keeper.address))
        .map(str::to_string)
}

fn merge_coordinates(keeper: &Venue, others: &[&Venue]) -> Option<Coordinates> {
    std::iter::once(keeper)
        .chain(others.iter().copied())
        .find_map(|v| {
            v.coordinates().map(|(latitude, longitude)| Coordinates {
                latitude,
                longitude,
                geocoded_at: v.geocoded_at,
            })
        })
}

/// Combine everything non-conflicting from `others` onto `keeper`
pub fn merge_group(keeper: &Venue, others: &[&Venue]) -> MergedPayload {
    MergedPayload {
        machine_type: first_present(keeper, others, |v| &v.machine_type),
        machine_model: first_present(keeper, others, |v| &v.machine_model),
        manufacturer: first_present(keeper, others, |v| &v.manufacturer),
        photo_type: first_present(keeper, others, |v| &v.photo_type),
        hours: first_present(keeper, others, |v| &v.hours),
        cost: first_present(keeper, others, |v| &v.cost),

        description: merge_descriptions(keeper, others),

        exterior_photo: first_present(keeper, others, |v| &v.exterior_photo),
        interior_photo: first_present(keeper, others, |v| &v.interior_photo),
        ai_preview: first_present(keeper, others, |v| &v.ai_preview),

        strip_photos: union(keeper, others, |v| &v.strip_photos),
        source_names: union(keeper, others, |v| &v.source_names),
        source_urls: union(keeper, others, |v| &v.source_urls),
        features: union(keeper, others, |v| &v.features),

        address: merge_address(keeper, others),
        postal_code: first_present(keeper, others, |v| &v.postal_code),
        state: first_present(keeper, others, |v| &v.state),
        coordinates: merge_coordinates(keeper, others),
    }
}
