use std::collections::BTreeMap;

use chainpulse_common::{normalize_entity, ChainPulseError, EntityType, Sentiment};

use crate::schema::ArticleExtraction;

/// Extraction output after validation and normalization. Every entity name
/// is canonical, salience is in range, and enums parsed.
#[derive(Debug, Clone)]
pub struct ValidExtraction {
    pub entities: Vec<ValidEntity>,
    pub sentiment: Sentiment,
    pub nucleus_entity: String,
    pub actors: Vec<String>,
    pub actor_salience: BTreeMap<String, u8>,
    pub key_actions: Vec<String>,
    pub narrative_summary: String,
}

#[derive(Debug, Clone)]
pub struct ValidEntity {
    pub value: String,
    pub entity_type: EntityType,
    pub is_primary: bool,
    pub confidence: f32,
}

/// Validate one raw article extraction. Any violated invariant fails the
/// whole article; the extractor retries it individually before skipping.
pub fn validate_extraction(raw: &ArticleExtraction) -> Result<ValidExtraction, ChainPulseError> {
    let nucleus = raw.nucleus_entity.trim();
    if nucleus.is_empty() {
        return Err(ChainPulseError::Validation(
            "nucleus_entity is empty".to_string(),
        ));
    }

    let sentiment: Sentiment = raw
        .sentiment
        .parse()
        .map_err(ChainPulseError::Validation)?;

    if raw.actors.is_empty() {
        return Err(ChainPulseError::Validation("actors list is empty".to_string()));
    }

    let mut actor_salience = BTreeMap::new();
    for (actor, salience) in &raw.actor_salience {
        if !(1..=5).contains(salience) {
            return Err(ChainPulseError::Validation(format!(
                "salience {salience} for '{actor}' out of range 1..=5"
            )));
        }
        actor_salience.insert(normalize_entity(actor), *salience as u8);
    }

    let mut entities = Vec::with_capacity(raw.entities.len());
    for entity in &raw.entities {
        let value = normalize_entity(&entity.value);
        if value.is_empty() {
            return Err(ChainPulseError::Validation("entity value is empty".to_string()));
        }
        let entity_type: EntityType = entity
            .entity_type
            .parse()
            .map_err(ChainPulseError::Validation)?;
        if !(0.0..=1.0).contains(&entity.confidence) {
            return Err(ChainPulseError::Validation(format!(
                "confidence {} for '{value}' out of range [0, 1]",
                entity.confidence
            )));
        }
        entities.push(ValidEntity {
            value,
            is_primary: entity_type.is_primary(),
            entity_type,
            confidence: entity.confidence as f32,
        });
    }

    // Dedup action phrases case-insensitively, keeping first occurrence.
    let mut seen = std::collections::HashSet::new();
    let key_actions: Vec<String> = raw
        .key_actions
        .iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty() && seen.insert(a.to_lowercase()))
        .collect();

    Ok(ValidExtraction {
        entities,
        sentiment,
        nucleus_entity: normalize_entity(nucleus),
        actors: raw.actors.iter().map(|a| normalize_entity(a)).collect(),
        actor_salience,
        key_actions,
        narrative_summary: raw.narrative_summary.trim().to_string(),
    })
}
