// 🧺 Candidate Grouper - partition venues by normalized key + locality
// Three strategies, evaluated in configured order by the planner

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::{present, Venue};
use crate::normalize::{has_street_content, normalize_address, normalize_locality, normalize_name};

// ============================================================================
// GROUPING STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    /// Same normalized street address in the same locality.
    /// Only venues whose address carries street-level content take part.
    ByAddress,

    /// Narrow pass for venues with no street content (missing address, city-only,
    /// landmark names): same normalized name in the same city
    CityOnlyAddress,

    /// Same normalized name in the same city, regardless of address
    ByName,
}

impl GroupingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingStrategy::ByAddress => "by_address",
            GroupingStrategy::CityOnlyAddress => "city_only_address",
            GroupingStrategy::ByName => "by_name",
        }
    }

    pub fn all() -> Vec<GroupingStrategy> {
        vec![
            GroupingStrategy::ByAddress,
            GroupingStrategy::CityOnlyAddress,
            GroupingStrategy::ByName,
        ]
    }
}

// ============================================================================
// DUPLICATE GROUP
// ============================================================================

/// Venues sharing one normalized key; reconstructed every run, never persisted
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub strategy: GroupingStrategy,
    pub key: String,
    pub locality: String,
    pub members: Vec<Venue>,
}

impl DuplicateGroup {
    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|v| v.id.as_str()).collect()
    }
}

// ============================================================================
// GROUPER
// ============================================================================

pub struct CandidateGrouper {
    pub min_street_address_len: usize,
}

impl CandidateGrouper {
    pub fn new(min_street_address_len: usize) -> Self {
        CandidateGrouper {
            min_street_address_len,
        }
    }

    /// Grouping key for one venue under `strategy`, or None when the venue
    /// is not groupable under it. Empty keys are never produced.
    pub fn key_for(&self, venue: &Venue, strategy: GroupingStrategy) -> Option<String> {
        let street = has_street_content(
            venue.address.as_deref(),
            &venue.city,
            self.min_street_address_len,
        );

        let key = match strategy {
            GroupingStrategy::ByAddress if street => {
                normalize_address(venue.address.as_deref().unwrap_or_default())
            }
            GroupingStrategy::ByAddress => return None,
            GroupingStrategy::CityOnlyAddress if !street => normalize_name(&venue.name),
            GroupingStrategy::CityOnlyAddress => return None,
            GroupingStrategy::ByName => normalize_name(&venue.name),
        };

        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Locality a venue is grouped within: city, state when recorded, then country.
    /// None when the city is blank.
    pub fn locality_for(&self, venue: &Venue) -> Option<String> {
        let city = normalize_locality(&venue.city);
        if city.is_empty() {
            return None;
        }

        let parts: Vec<String> = [
            Some(city),
            present(&venue.state).map(normalize_locality),
            Some(normalize_locality(&venue.country)),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect();

        Some(parts.join(", "))
    }

    /// Partition `venues` and return only keys shared by two or more records.
    /// Groups come out in key order; members keep input order.
    pub fn group(&self, venues: &[Venue], strategy: GroupingStrategy) -> Vec<DuplicateGroup> {
        let mut buckets: BTreeMap<(String, String), Vec<Venue>> = BTreeMap::new();

        for venue in venues {
            let Some(locality) = self.locality_for(venue) else {
                continue;
            };

            if let Some(key) = self.key_for(venue, strategy) {
                buckets.entry((key, locality)).or_default().push(venue.clone());
            }
        }

        buckets
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .map(|((key, locality), members)| DuplicateGroup {
                strategy,
                key,
                locality,
                members,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_venue;

    #[test]
    fn test_groups_by_normalized_address() {
        let grouper = CandidateGrouper::new(6);
        let venues = vec![
            test_venue("a", "Arcade", Some("123 Main Street"), "Springfield"),
            test_venue("b", "The Arcade", Some("123 main st."), "springfield"),
            test_venue("c", "Diner", Some("9 Elm Ave"), "Springfield"),
        ];

        let groups = grouper.group(&venues, GroupingStrategy::ByAddress);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "123 main st");
        assert_eq!(groups[0].locality, "springfield, us");
        assert_eq!(groups[0].member_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_same_address_different_city_not_grouped() {
        let grouper = CandidateGrouper::new(6);
        let venues = vec![
            test_venue("a", "Arcade", Some("123 Main St"), "Springfield"),
            test_venue("b", "Arcade", Some("123 Main St"), "Shelbyville"),
        ];

        assert!(grouper.group(&venues, GroupingStrategy::ByAddress).is_empty());
    }

    #[test]
    fn test_same_city_name_in_different_regions_not_grouped() {
        let grouper = CandidateGrouper::new(6);
        let mut illinois = test_venue("a", "Arcade", Some("100 Main St"), "Springfield");
        illinois.state = Some("IL".to_string());
        let mut massachusetts = test_venue("b", "Arcade", Some("100 Main St"), "Springfield");
        massachusetts.state = Some("MA".to_string());
        let mut france = test_venue("c", "Photo Booth", None, "Paris");
        france.country = "FR".to_string();
        let mut texas = test_venue("d", "Photo Booth", None, "Paris");
        texas.state = Some("TX".to_string());

        let venues = vec![illinois, massachusetts, france, texas];

        assert!(grouper.group(&venues, GroupingStrategy::ByAddress).is_empty());
        assert!(grouper.group(&venues, GroupingStrategy::CityOnlyAddress).is_empty());
        assert!(grouper.group(&venues, GroupingStrategy::ByName).is_empty());
    }

    #[test]
    fn test_locality_includes_state_and_country() {
        let grouper = CandidateGrouper::new(6);
        let mut venue = test_venue("a", "Arcade", None, "St. Louis");
        assert_eq!(grouper.locality_for(&venue).as_deref(), Some("st louis, us"));

        venue.state = Some(" MO ".to_string());
        assert_eq!(grouper.locality_for(&venue).as_deref(), Some("st louis, mo, us"));

        venue.city = "  ".to_string();
        assert_eq!(grouper.locality_for(&venue), None);
    }

    #[test]
    fn test_missing_addresses_never_grouped_together() {
        let grouper = CandidateGrouper::new(6);
        let venues = vec![
            test_venue("a", "Arcade", None, "Springfield"),
            test_venue("b", "Bowling", None, "Springfield"),
            test_venue("c", "Cinema", Some(""), "Springfield"),
        ];

        assert!(grouper.group(&venues, GroupingStrategy::ByAddress).is_empty());
    }

    #[test]
    fn test_city_only_address_excluded_from_address_grouping() {
        let grouper = CandidateGrouper::new(6);
        let venues = vec![
            test_venue("a", "Arcade", Some("Springfield"), "Springfield"),
            test_venue("b", "Arcade", Some("Springfield"), "Springfield"),
        ];

        assert!(grouper.group(&venues, GroupingStrategy::ByAddress).is_empty());

        let groups = grouper.group(&venues, GroupingStrategy::CityOnlyAddress);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "arcade");
    }

    #[test]
    fn test_city_only_pass_ignores_street_addresses() {
        let grouper = CandidateGrouper::new(6);
        let venues = vec![
            test_venue("a", "Arcade", Some("123 Main St"), "Springfield"),
            test_venue("b", "Arcade", None, "Springfield"),
        ];

        assert!(grouper.group(&venues, GroupingStrategy::CityOnlyAddress).is_empty());
        assert_eq!(grouper.group(&venues, GroupingStrategy::ByName).len(), 1);
    }

    #[test]
    fn test_empty_city_never_grouped() {
        let grouper = CandidateGrouper::new(6);
        let venues = vec![
            test_venue("a", "Arcade", Some("123 Main St"), ""),
            test_venue("b", "Arcade", Some("123 Main St"), " "),
        ];

        assert!(grouper.group(&venues, GroupingStrategy::ByAddress).is_empty());
        assert!(grouper.group(&venues, GroupingStrategy::ByName).is_empty());
    }
}
