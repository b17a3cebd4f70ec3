pub mod catalogue;
pub mod rules;
pub mod steps;

pub use rules::{Constraint, FieldRule, FieldScope, Predicate, Requirement};
pub use steps::{StepDefinition, StepGate, StepId, remap_step_index};

use crate::record::{FieldPath, ListingRecord, ListingType};
use once_cell::sync::Lazy;

/// Active rule set and step list for one listing type.
#[derive(Debug)]
pub struct Schema {
    pub listing_type: ListingType,
    pub steps: Vec<StepDefinition>,
    rules: Vec<FieldRule>,
}

static SCHEMAS: Lazy<Vec<Schema>> = Lazy::new(|| {
    ListingType::ALL
        .iter()
        .map(|listing_type| Schema::build(*listing_type))
        .collect()
});

/// Undefined discriminants resolve to the first variant so the wizard always
/// has steps to render.
pub fn resolve_schema(discriminant: Option<ListingType>) -> &'static Schema {
    let wanted = discriminant.unwrap_or_default();
    SCHEMAS
        .iter()
        .find(|schema| schema.listing_type == wanted)
        .unwrap_or(&SCHEMAS[0])
}

pub fn resolve_steps(discriminant: Option<ListingType>) -> &'static [StepDefinition] {
    &resolve_schema(discriminant).steps
}

impl Schema {
    fn build(listing_type: ListingType) -> Self {
        Self {
            listing_type,
            steps: steps::steps_for(listing_type),
            rules: catalogue::rules_for(listing_type),
        }
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn rule(&self, path: &FieldPath) -> Option<&FieldRule> {
        if let Some((_, level)) = path.parse_classification() {
            return self
                .rules
                .iter()
                .find(|rule| rule.scope == FieldScope::Classification(level));
        }
        self.rules.iter().find(|rule| rule.path == path.as_str())
    }

    pub fn step_index(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    pub fn declares_detail(&self, key: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.scope == FieldScope::Variant && rule.path == key)
    }

    /// Every field that transitively hangs off `path` through `parent` links.
    pub fn descendants(&self, path: &str) -> Vec<&'static str> {
        let mut found: Vec<&'static str> = Vec::new();
        let mut frontier = vec![path.to_string()];
        while let Some(current) = frontier.pop() {
            for rule in &self.rules {
                if rule.parent == Some(current.as_str()) && !found.contains(&rule.path) {
                    found.push(rule.path);
                    frontier.push(rule.path.to_string());
                }
            }
        }
        found
    }

    /// Concrete paths for a rule; classification templates expand per entry.
    pub fn concrete_paths(&self, rule: &FieldRule, record: &ListingRecord) -> Vec<FieldPath> {
        match rule.scope {
            FieldScope::Classification(level) => (0..record.classifications.len())
                .map(|index| FieldPath::classification(index, level))
                .collect(),
            _ => vec![FieldPath::new(rule.path)],
        }
    }

    /// Paths whose errors block leaving `step`. Dynamic steps only own the
    /// conditional fields whose predicate holds right now.
    pub fn step_owned_paths(&self, step: StepId, record: &ListingRecord) -> Vec<FieldPath> {
        let Some(definition) = self.steps.iter().find(|s| s.id == step) else {
            return Vec::new();
        };
        if definition.gate == StepGate::Summary {
            return Vec::new();
        }
        self.rules
            .iter()
            .filter(|rule| rule.step == step)
            .filter(|rule| definition.gate == StepGate::OwnedFields || rule.is_active(record))
            .flat_map(|rule| self.concrete_paths(rule, record))
            .collect()
    }

    /// All gated paths in step order.
    pub fn all_paths(&self, record: &ListingRecord) -> Vec<FieldPath> {
        self.steps
            .iter()
            .flat_map(|step| self.step_owned_paths(step.id, record))
            .collect()
    }

    pub fn step_of(&self, path: &FieldPath) -> Option<StepId> {
        self.rule(path).map(|rule| rule.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, ListingDetails};

    fn record_of(listing_type: ListingType) -> ListingRecord {
        ListingRecord {
            details: Some(ListingDetails::empty(listing_type)),
            ..ListingRecord::default()
        }
    }

    #[test]
    fn every_variant_resolves_bookended_steps() {
        for listing_type in ListingType::ALL {
            let steps = resolve_steps(Some(listing_type));
            assert!(steps.len() >= 4, "{listing_type} has too few steps");
            assert_eq!(steps[0].id, StepId::Basics);
            assert_eq!(steps[steps.len() - 2].id, StepId::Media);
            assert_eq!(steps[steps.len() - 1].id, StepId::Review);
            assert_eq!(
                steps.iter().filter(|s| s.id == StepId::Details).count(),
                1
            );
        }
    }

    #[test]
    fn step_counts_per_variant() {
        assert_eq!(resolve_steps(Some(ListingType::Business)).len(), 5);
        assert_eq!(resolve_steps(Some(ListingType::Franchise)).len(), 6);
        assert_eq!(resolve_steps(Some(ListingType::Investor)).len(), 4);
    }

    #[test]
    fn undefined_discriminant_falls_back_to_first_variant() {
        assert_eq!(resolve_steps(None), resolve_steps(Some(ListingType::Business)));
        assert_eq!(resolve_schema(None).listing_type, ListingType::Business);
    }

    #[test]
    fn resolution_is_stable() {
        let first = resolve_steps(Some(ListingType::Startup));
        let second = resolve_steps(Some(ListingType::Startup));
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn remap_keeps_step_identity_or_clamps() {
        let franchise = resolve_steps(Some(ListingType::Franchise));
        let investor = resolve_steps(Some(ListingType::Investor));
        let business = resolve_steps(Some(ListingType::Business));
        // franchise media (4) → investor media (2)
        assert_eq!(remap_step_index(franchise, investor, 4), 2);
        // franchise terms (3) does not exist for business → clamp
        assert_eq!(remap_step_index(franchise, business, 3), 3);
        // classification is missing for investors, index 1 stays in bounds
        assert_eq!(remap_step_index(business, investor, 1), 1);
        assert_eq!(remap_step_index(franchise, investor, 99), 3);
    }

    #[test]
    fn details_step_owns_conditional_fields_only_when_active() {
        let schema = resolve_schema(Some(ListingType::Business));
        let mut record = record_of(ListingType::Business);
        let owned = schema.step_owned_paths(StepId::Details, &record);
        assert!(!owned.contains(&FieldPath::new("lease_monthly_cost")));
        assert!(owned.contains(&FieldPath::new("asking_price")));

        record
            .set_detail("location_type", FieldValue::text("leased"))
            .expect("detail");
        let owned = schema.step_owned_paths(StepId::Details, &record);
        assert!(owned.contains(&FieldPath::new("lease_monthly_cost")));
        assert!(owned.contains(&FieldPath::new("lease_expiry_year")));
    }

    #[test]
    fn classification_paths_expand_per_entry() {
        let schema = resolve_schema(Some(ListingType::Business));
        let mut record = record_of(ListingType::Business);
        record.add_classification().expect("entry");
        record.add_classification().expect("entry");
        let owned = schema.step_owned_paths(StepId::Classification, &record);
        assert!(owned.contains(&FieldPath::new("classifications")));
        assert!(owned.contains(&FieldPath::new("classifications.1.subcategories")));
        assert_eq!(owned.len(), 7);
    }

    #[test]
    fn descendants_follow_parent_links() {
        let schema = resolve_schema(Some(ListingType::Business));
        let mut found = schema.descendants("location_type");
        found.sort();
        assert_eq!(found, vec!["lease_expiry_year", "lease_monthly_cost"]);
        assert!(schema.descendants("title").is_empty());
    }

    #[test]
    fn review_owns_nothing() {
        let schema = resolve_schema(Some(ListingType::Franchise));
        assert!(
            schema
                .step_owned_paths(StepId::Review, &record_of(ListingType::Franchise))
                .is_empty()
        );
    }
}
