use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::record::{OutputRecord, BINOMIAL_NAME_FIELD, METADATA_COLUMNS};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vote {
    pub value: Value,
    pub count: usize,
}

/// Majority value per field across several predictions for one organism.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub consensus: Map<String, Value>,
    /// Vote tallies of the fields where the predictions were not unanimous,
    /// most voted first.
    pub disagreements: BTreeMap<String, Vec<Vote>>,
}

impl PredictionSummary {
    pub fn is_unanimous(&self) -> bool {
        self.disagreements.is_empty()
    }
}

/// Fields are those of the first record. A tie goes to the value seen first;
/// records missing a field do not vote on it.
pub fn summarize(records: &[OutputRecord]) -> PredictionSummary {
    let Some(first) = records.first() else {
        return PredictionSummary::default();
    };

    let mut summary = PredictionSummary::default();
    for field in first.prediction.keys() {
        if METADATA_COLUMNS.contains(&field) {
            continue;
        }
        let mut votes: Vec<Vote> = Vec::new();
        for value in records.iter().filter_map(|record| record.prediction.get(field)) {
            match votes.iter_mut().find(|vote| vote.value == *value) {
                Some(vote) => vote.count += 1,
                None => votes.push(Vote {
                    value: value.clone(),
                    count: 1,
                }),
            }
        }
        // stable sort keeps first-seen order among equal counts
        votes.sort_by(|a, b| b.count.cmp(&a.count));

        let Some(top) = votes.first() else { continue };
        summary.consensus.insert(field.to_string(), top.value.clone());
        if votes.len() > 1 {
            summary.disagreements.insert(field.to_string(), votes);
        }
    }

    if let Some(name) = first.prediction.get(BINOMIAL_NAME_FIELD) {
        summary.consensus.insert(BINOMIAL_NAME_FIELD.to_string(), name.clone());
    }
    summary
}
