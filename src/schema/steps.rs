use serde::{Deserialize, Serialize};

use crate::record::ListingType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Basics,
    Classification,
    Details,
    Terms,
    Media,
    Review,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::Basics => "basics",
            StepId::Classification => "classification",
            StepId::Details => "details",
            StepId::Terms => "terms",
            StepId::Media => "media",
            StepId::Review => "review",
        }
    }
}

/// How a step decides which fields gate leaving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepGate {
    /// Every rule assigned to the step.
    OwnedFields,
    /// Rules assigned to the step whose conditional requirement currently holds.
    ActivePredicates,
    /// Nothing of its own; submission re-validates the whole record.
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepDefinition {
    pub id: StepId,
    pub title: &'static str,
    pub gate: StepGate,
}

const BASICS: StepDefinition = StepDefinition {
    id: StepId::Basics,
    title: "Listing basics",
    gate: StepGate::OwnedFields,
};

const CLASSIFICATION: StepDefinition = StepDefinition {
    id: StepId::Classification,
    title: "Industry & category",
    gate: StepGate::OwnedFields,
};

const TERMS: StepDefinition = StepDefinition {
    id: StepId::Terms,
    title: "Franchise terms",
    gate: StepGate::ActivePredicates,
};

const MEDIA: StepDefinition = StepDefinition {
    id: StepId::Media,
    title: "Photos & documents",
    gate: StepGate::OwnedFields,
};

const REVIEW: StepDefinition = StepDefinition {
    id: StepId::Review,
    title: "Review & publish",
    gate: StepGate::Summary,
};

fn details(listing_type: ListingType) -> StepDefinition {
    let title = match listing_type {
        ListingType::Business => "Business details",
        ListingType::Franchise => "Franchise details",
        ListingType::Startup => "Startup details",
        ListingType::Investor => "Investor profile",
        ListingType::DigitalAsset => "Digital asset details",
    };
    StepDefinition {
        id: StepId::Details,
        title,
        gate: StepGate::ActivePredicates,
    }
}

/// Media and review always close the list; the middle depends on the variant.
pub fn steps_for(listing_type: ListingType) -> Vec<StepDefinition> {
    match listing_type {
        ListingType::Business | ListingType::Startup | ListingType::DigitalAsset => vec![
            BASICS,
            CLASSIFICATION,
            details(listing_type),
            MEDIA,
            REVIEW,
        ],
        ListingType::Franchise => vec![
            BASICS,
            CLASSIFICATION,
            details(listing_type),
            TERMS,
            MEDIA,
            REVIEW,
        ],
        ListingType::Investor => vec![BASICS, details(listing_type), MEDIA, REVIEW],
    }
}

/// Keeps the user on the same step when the new list still has it, otherwise
/// clamps into range.
pub fn remap_step_index(from: &[StepDefinition], to: &[StepDefinition], index: usize) -> usize {
    let last = to.len().saturating_sub(1);
    from.get(index)
        .and_then(|step| to.iter().position(|candidate| candidate.id == step.id))
        .unwrap_or_else(|| index.min(last))
}
