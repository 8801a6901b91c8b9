//! Rule-based entity tagging for domain terms the NER model does not know

use crate::config::ResolverConfig;
use crate::errors::{AppError, Result};
use crate::resolver::ner::RecognizedEntity;
use regex_lite::Regex;

pub const WEAPON_LABEL: &str = "WEAPON";
pub const VIOLENT_ACT_LABEL: &str = "VIOLENT_ACT";
pub const INJURY_LABEL: &str = "INJURY";

pub const VIOLENT_ACT_TERMS: &[&str] = &[
    "shooting", "bombing", "stabbed", "hijack", "attack", "assassination",
    "explosion", "arson", "beating", "torture", "kidnapping", "massacre",
];

pub const INJURY_TERMS: &[&str] = &["killed", "wounded", "injured", "casualties", "fatalities"];

/// Case-insensitive whole-word matcher, one pattern per label
pub struct EntityRuler {
    patterns: Vec<(String, Regex)>,
}

impl EntityRuler {
    /// Build from `(label, terms)` groups. Groups without terms are skipped.
    pub fn new(groups: &[(&str, Vec<String>)]) -> Result<Self> {
        let mut patterns = Vec::new();

        for (label, terms) in groups {
            let alternation = terms
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(regex_lite::escape)
                .collect::<Vec<_>>()
                .join("|");

            if alternation.is_empty() {
                continue;
            }

            let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).map_err(|e| {
                AppError::Configuration {
                    message: format!("Invalid {} patterns: {}", label, e),
                }
            })?;
            patterns.push((label.to_string(), regex));
        }

        Ok(Self { patterns })
    }

    /// Weapon terms from config (inline list and optional file), plus the
    /// built-in violent act and injury vocabularies
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let mut weapons = config.weapon_terms.clone();
        if let Some(path) = &config.weapon_terms_path {
            let contents = std::fs::read_to_string(path).map_err(|e| AppError::Configuration {
                message: format!("Failed to read weapon terms from {}: {}", path, e),
            })?;
            weapons.extend(contents.lines().map(str::to_string));
        }

        let owned = |terms: &[&str]| terms.iter().map(|t| t.to_string()).collect::<Vec<_>>();

        Self::new(&[
            (WEAPON_LABEL, weapons),
            (VIOLENT_ACT_LABEL, owned(VIOLENT_ACT_TERMS)),
            (INJURY_LABEL, owned(INJURY_TERMS)),
        ])
    }

    /// All matches ordered by position. Earlier groups win on overlap.
    pub fn find(&self, text: &str) -> Vec<RecognizedEntity> {
        let mut found: Vec<RecognizedEntity> = Vec::new();

        for (label, regex) in &self.patterns {
            for m in regex.find_iter(text) {
                let overlaps = found.iter().any(|e| e.start < m.end() && m.start() < e.end);
                if !overlaps {
                    found.push(RecognizedEntity {
                        text: m.as_str().to_string(),
                        label: label.clone(),
                        start: m.start(),
                        end: m.end(),
                    });
                }
            }
        }

        found.sort_by_key(|e| e.start);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruler() -> EntityRuler {
        let config = ResolverConfig {
            weapon_terms: vec!["AK-47".to_string(), "machete".to_string(), " ".to_string()],
            ..Default::default()
        };
        EntityRuler::from_config(&config).unwrap()
    }

    #[test]
    fn test_finds_terms_in_order() {
        let found = ruler().find("Gunmen with an ak-47 killed two in a shooting");
        let tagged: Vec<(&str, &str)> = found.iter().map(|e| (e.text.as_str(), e.label.as_str())).collect();
        assert_eq!(
            tagged,
            vec![("ak-47", "WEAPON"), ("killed", "INJURY"), ("shooting", "VIOLENT_ACT")]
        );
    }

    #[test]
    fn test_whole_words_only() {
        assert!(ruler().find("The attacker fled").is_empty());
        assert_eq!(ruler().find("An ATTACK was reported")[0].text, "ATTACK");
    }

    #[test]
    fn test_empty_groups_are_skipped() {
        let ruler = EntityRuler::new(&[(WEAPON_LABEL, vec![])]).unwrap();
        assert!(ruler.find("machete").is_empty());
    }
}
