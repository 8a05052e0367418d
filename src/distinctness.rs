// 🧭 Distinctness Classifier - rules as an ordered policy
// Decides whether a candidate group is one location or several entities sharing a key.
// A wrong "not distinct" verdict merges and deletes a real venue, so every rule
// errs toward "distinct".
//
// Precedence (first rule that fires wins):
//   1. street_content          (by_address only)
//   2. address_divergence
//   3. enumerated_name
//   4. machine_type_divergence
//   5. machine_model_divergence
//   6. description_divergence  (not for city_only_address)
//   otherwise: duplicates

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::db::{present, Venue};
use crate::grouping::{DuplicateGroup, GroupingStrategy};
use crate::normalize::{has_street_content, normalize_address, normalize_name};

/// Suffixes that mark intentionally enumerated machines ("Arcade II", "Booth #2")
static ENUMERATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\s(xx|xix|xviii|xvii|xvi|xv|xiv|xiii|xii|xi|x|ix|viii|vii|vi|v|iv|iii|ii|i)$",
        r"#\s*\d+",
        r"\bno\.?\s*\d+$",
        r"\s\d+(st|nd|rd|th)?$",
        r"[a-z][-_]\d+$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

pub fn has_enumeration_suffix(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    ENUMERATION_PATTERNS.iter().any(|re| re.is_match(&lower))
}

// ============================================================================
// RULES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistinctnessRule {
    StreetContent,
    AddressDivergence,
    EnumeratedName,
    MachineTypeDivergence,
    MachineModelDivergence,
    DescriptionDivergence,
}

impl DistinctnessRule {
    pub fn name(&self) -> &'static str {
        match self {
            DistinctnessRule::StreetContent => "street_content",
            DistinctnessRule::AddressDivergence => "address_divergence",
            DistinctnessRule::EnumeratedName => "enumerated_name",
            DistinctnessRule::MachineTypeDivergence => "machine_type_divergence",
            DistinctnessRule::MachineModelDivergence => "machine_model_divergence",
            DistinctnessRule::DescriptionDivergence => "description_divergence",
        }
    }

    pub fn applies_to(&self, strategy: GroupingStrategy) -> bool {
        match self {
            DistinctnessRule::StreetContent => strategy == GroupingStrategy::ByAddress,
            // Same name + same city with no street address: duplicates by default,
            // descriptions from different crawlers are expected to differ
            DistinctnessRule::DescriptionDivergence => {
                strategy != GroupingStrategy::CityOnlyAddress
            }
            _ => true,
        }
    }

    /// Reason string when the rule fires, None otherwise
    pub fn evaluate(&self, settings: &ClassifierSettings, members: &[Venue]) -> Option<String> {
        match self {
            DistinctnessRule::StreetContent => {
                let bare: Vec<&str> = members
                    .iter()
                    .filter(|v| {
                        !has_street_content(
                            v.address.as_deref(),
                            &v.city,
                            settings.min_street_address_len,
                        )
                    })
                    .map(|v| v.id.as_str())
                    .collect();

                if bare.is_empty() {
                    None
                } else {
                    Some(format!("no street-level address on {}", bare.join(", ")))
                }
            }

            // Two street-level addresses in one group are two places, whatever the name says
            DistinctnessRule::AddressDivergence => {
                let addresses: BTreeSet<String> = members
                    .iter()
                    .filter(|v| {
                        has_street_content(
                            v.address.as_deref(),
                            &v.city,
                            settings.min_street_address_len,
                        )
                    })
                    .filter_map(|v| v.address.as_deref())
                    .map(normalize_address)
                    .collect();

                if addresses.len() > 1 {
                    Some(format!(
                        "street addresses differ: {}",
                        addresses.into_iter().collect::<Vec<_>>().join(" / ")
                    ))
                } else {
                    None
                }
            }

            DistinctnessRule::EnumeratedName => {
                let names: BTreeSet<String> =
                    members.iter().map(|v| normalize_name(&v.name)).collect();
                let enumerated: Vec<&str> = members
                    .iter()
                    .filter(|v| has_enumeration_suffix(&v.name))
                    .map(|v| v.name.as_str())
                    .collect();

                if names.len() > 1 && !enumerated.is_empty() {
                    Some(format!("enumerated names: {}", enumerated.join(", ")))
                } else {
                    None
                }
            }

            DistinctnessRule::MachineTypeDivergence => {
                divergent_values(members, |v| &v.machine_type)
                    .map(|values| format!("machine types differ: {}", values))
            }

            DistinctnessRule::MachineModelDivergence => {
                divergent_values(members, |v| &v.machine_model)
                    .map(|values| format!("machine models differ: {}", values))
            }

            DistinctnessRule::DescriptionDivergence => {
                let lengths: Vec<usize> = members
                    .iter()
                    .filter_map(|v| present(&v.description))
                    .map(|d| d.chars().count())
                    .collect();

                let shortest = *lengths.iter().min()?;
                let longest = *lengths.iter().max()?;
                if lengths.len() < 2 {
                    return None;
                }

                let allowed = settings.description_divergence_ratio * shortest as f64;
                if (longest - shortest) as f64 > allowed {
                    Some(format!(
                        "description lengths {} vs {} differ by more than {:.0}%",
                        shortest,
                        longest,
                        settings.description_divergence_ratio * 100.0
                    ))
                } else {
                    None
                }
            }
        }
    }
}

/// More than one distinct non-null value (case-insensitive, trimmed)
fn divergent_values(members: &[Venue], field: fn(&Venue) -> &Option<String>) -> Option<String> {
    let values: BTreeSet<String> = members
        .iter()
        .filter_map(|v| present(field(v)))
        .map(str::to_lowercase)
        .collect();

    if values.len() > 1 {
        Some(values.into_iter().collect::<Vec<_>>().join(" / "))
    } else {
        None
    }
}

// ============================================================================
// VERDICT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub distinct: bool,
    pub rule: Option<DistinctnessRule>,
    pub reason: String,
}

impl Verdict {
    fn duplicates() -> Self {
        Verdict {
            distinct: false,
            rule: None,
            reason: "no distinctness signal".to_string(),
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub min_street_address_len: usize,
    pub description_divergence_ratio: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            min_street_address_len: 6,
            description_divergence_ratio: 0.5,
        }
    }
}

pub struct DistinctnessClassifier {
    rules: Vec<DistinctnessRule>,
    settings: ClassifierSettings,
}

impl DistinctnessClassifier {
    /// Classifier with the full policy in precedence order
    pub fn new(settings: ClassifierSettings) -> Self {
        DistinctnessClassifier {
            rules: vec![
                DistinctnessRule::StreetContent,
                DistinctnessRule::AddressDivergence,
                DistinctnessRule::EnumeratedName,
                DistinctnessRule::MachineTypeDivergence,
                DistinctnessRule::MachineModelDivergence,
                DistinctnessRule::DescriptionDivergence,
            ],
            settings,
        }
    }

    pub fn classify(&self, strategy: GroupingStrategy, members: &[Venue]) -> Verdict {
        for rule in self.rules.iter().filter(|r| r.applies_to(strategy)) {
            if let Some(reason) = rule.evaluate(&self.settings, members) {
                return Verdict {
                    distinct: true,
                    rule: Some(*rule),
                    reason,
                };
            }
        }

        Verdict::duplicates()
    }

    pub fn is_truly_distinct(&self, group: &DuplicateGroup) -> bool {
        self.classify(group.strategy, &group.members).distinct
    }
}

impl Default for DistinctnessClassifier {
    fn default() -> Self {
        Self::new(ClassifierSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_venue;

    fn group(strategy: GroupingStrategy, members: Vec<Venue>) -> DuplicateGroup {
        DuplicateGroup {
            strategy,
            key: "key".to_string(),
            locality: "springfield".to_string(),
            members,
        }
    }

    #[test]
    fn test_enumeration_suffixes() {
        assert!(has_enumeration_suffix("Arcade II"));
        assert!(has_enumeration_suffix("Arcade I"));
        assert!(has_enumeration_suffix("Photo Booth #2"));
        assert!(has_enumeration_suffix("Booth No. 3"));
        assert!(has_enumeration_suffix("Mall Booth 2"));
        assert!(has_enumeration_suffix("booth-4"));
        assert!(!has_enumeration_suffix("Arcade"));
        assert!(!has_enumeration_suffix("Vivid Photos"));
    }

    #[test]
    fn test_numbered_venues_are_distinct() {
        let classifier = DistinctnessClassifier::default();
        let g = group(
            GroupingStrategy::ByAddress,
            vec![
                test_venue("a", "Arcade I", Some("123 Main St"), "Springfield"),
                test_venue("b", "Arcade II", Some("123 Main St"), "Springfield"),
            ],
        );

        let verdict = classifier.classify(g.strategy, &g.members);
        assert!(verdict.distinct);
        assert_eq!(verdict.rule, Some(DistinctnessRule::EnumeratedName));
        assert!(classifier.is_truly_distinct(&g));
    }

    #[test]
    fn test_identical_enumerated_names_are_duplicates() {
        let classifier = DistinctnessClassifier::default();
        let members = vec![
            test_venue("a", "Booth #2", Some("123 Main St"), "Springfield"),
            test_venue("b", "booth #2", Some("123 Main St"), "Springfield"),
        ];

        assert!(!classifier.classify(GroupingStrategy::ByAddress, &members).distinct);
    }

    #[test]
    fn test_machine_type_divergence() {
        let classifier = DistinctnessClassifier::default();
        let mut a = test_venue("a", "Arcade", Some("123 Main St"), "Springfield");
        let mut b = test_venue("b", "Arcade", Some("123 Main St"), "Springfield");
        a.machine_type = Some("Chemical".to_string());
        b.machine_type = Some("Digital".to_string());

        let verdict = classifier.classify(GroupingStrategy::ByAddress, &[a.clone(), b.clone()]);
        assert_eq!(verdict.rule, Some(DistinctnessRule::MachineTypeDivergence));

        // Case and whitespace differences are not divergence
        b.machine_type = Some(" chemical ".to_string());
        assert!(!classifier.classify(GroupingStrategy::ByAddress, &[a, b]).distinct);
    }

    #[test]
    fn test_machine_model_divergence_ignores_nulls() {
        let classifier = DistinctnessClassifier::default();
        let mut a = test_venue("a", "Arcade", Some("123 Main St"), "Springfield");
        let b = test_venue("b", "Arcade", Some("123 Main St"), "Springfield");
        let mut c = test_venue("c", "Arcade", Some("123 Main St"), "Springfield");
        a.machine_model = Some("Model 11".to_string());

        assert!(!classifier.classify(GroupingStrategy::ByAddress, &[a.clone(), b.clone()]).distinct);

        c.machine_model = Some("Model 14".to_string());
        let verdict = classifier.classify(GroupingStrategy::ByAddress, &[a, b, c]);
        assert_eq!(verdict.rule, Some(DistinctnessRule::MachineModelDivergence));
    }

    #[test]
    fn test_description_divergence_threshold() {
        let classifier = DistinctnessClassifier::default();
        let mut a = test_venue("a", "Arcade", Some("123 Main St"), "Springfield");
        let mut b = test_venue("b", "Arcade", Some("123 Main St"), "Springfield");

        a.description = Some("x".repeat(100));
        b.description = Some("y".repeat(150));
        assert!(
            !classifier.classify(GroupingStrategy::ByAddress, &[a.clone(), b.clone()]).distinct,
            "exactly 50% longer is within tolerance"
        );

        b.description = Some("y".repeat(151));
        let verdict = classifier.classify(GroupingStrategy::ByAddress, &[a.clone(), b.clone()]);
        assert_eq!(verdict.rule, Some(DistinctnessRule::DescriptionDivergence));

        // Not applied to the city-only pass
        assert!(!classifier.classify(GroupingStrategy::CityOnlyAddress, &[a, b]).distinct);
    }

    #[test]
    fn test_single_description_is_not_divergence() {
        let classifier = DistinctnessClassifier::default();
        let mut a = test_venue("a", "Arcade", Some("123 Main St"), "Springfield");
        let b = test_venue("b", "Arcade", Some("123 Main St"), "Springfield");
        a.description = Some("A long, carefully written description".to_string());

        assert!(!classifier.classify(GroupingStrategy::ByAddress, &[a, b]).distinct);
    }

    #[test]
    fn test_street_content_required_for_address_groups_only() {
        let classifier = DistinctnessClassifier::default();
        let members = vec![
            test_venue("a", "Arcade", Some("Springfield"), "Springfield"),
            test_venue("b", "Arcade", Some("Springfield"), "Springfield"),
        ];

        let verdict = classifier.classify(GroupingStrategy::ByAddress, &members);
        assert_eq!(verdict.rule, Some(DistinctnessRule::StreetContent));

        assert!(!classifier.classify(GroupingStrategy::CityOnlyAddress, &members).distinct);
    }

    #[test]
    fn test_same_name_at_different_street_addresses_is_distinct() {
        let classifier = DistinctnessClassifier::default();
        let members = vec![
            test_venue("a", "Urban Outfitters", Some("100 Main Street"), "Chicago"),
            test_venue("b", "Urban Outfitters", Some("2352 N Clark St"), "Chicago"),
        ];

        let verdict = classifier.classify(GroupingStrategy::ByName, &members);
        assert!(verdict.distinct);
        assert_eq!(verdict.rule, Some(DistinctnessRule::AddressDivergence));
        assert!(verdict.reason.contains("100 main st"));
    }

    #[test]
    fn test_by_name_group_with_one_street_address_is_duplicate() {
        let classifier = DistinctnessClassifier::default();
        let members = vec![
            test_venue("a", "Urban Outfitters", Some("100 Main Street"), "Chicago"),
            test_venue("b", "Urban Outfitters", Some("100 main st."), "Chicago"),
            test_venue("c", "Urban Outfitters", None, "Chicago"),
            test_venue("d", "Urban Outfitters", Some("Chicago"), "Chicago"),
        ];

        let verdict = classifier.classify(GroupingStrategy::ByName, &members);
        assert!(!verdict.distinct, "{}", verdict.reason);
        assert_eq!(verdict.rule, None);
    }

    #[test]
    fn test_by_name_machine_divergence_still_applies() {
        let classifier = DistinctnessClassifier::default();
        let mut a = test_venue("a", "Arcade", None, "Springfield");
        let mut b = test_venue("b", "Arcade", None, "Springfield");
        a.machine_model = Some("Model 11".to_string());
        b.machine_model = Some("Model 21".to_string());

        let verdict = classifier.classify(GroupingStrategy::ByName, &[a, b]);
        assert_eq!(verdict.rule, Some(DistinctnessRule::MachineModelDivergence));
    }

    #[test]
    fn test_rule_names_match_serialized_form() {
        for rule in [
            DistinctnessRule::StreetContent,
            DistinctnessRule::AddressDivergence,
            DistinctnessRule::EnumeratedName,
            DistinctnessRule::MachineTypeDivergence,
            DistinctnessRule::MachineModelDivergence,
            DistinctnessRule::DescriptionDivergence,
        ] {
            assert_eq!(serde_json::to_string(&rule).unwrap(), format!("\"{}\"", rule.name()));
        }
    }

    #[test]
    fn test_rule_precedence() {
        let classifier = DistinctnessClassifier::default();
        let mut a = test_venue("a", "Arcade I", Some("123 Main St"), "Springfield");
        let mut b = test_venue("b", "Arcade II", Some("123 Main St"), "Springfield");
        a.machine_type = Some("Chemical".to_string());
        b.machine_type = Some("Digital".to_string());

        let verdict = classifier.classify(GroupingStrategy::ByAddress, &[a, b]);
        assert_eq!(verdict.rule, Some(DistinctnessRule::EnumeratedName));
    }
}
