use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::classification::{ClassificationEntry, MAX_CLASSIFICATIONS};
use crate::record::fields::{CLASSIFICATIONS_PATH, FieldMap, FieldPath, FieldValue};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    #[default]
    Business,
    Franchise,
    Startup,
    Investor,
    DigitalAsset,
}

impl ListingType {
    pub const ALL: [ListingType; 5] = [
        ListingType::Business,
        ListingType::Franchise,
        ListingType::Startup,
        ListingType::Investor,
        ListingType::DigitalAsset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Business => "business",
            ListingType::Franchise => "franchise",
            ListingType::Startup => "startup",
            ListingType::Investor => "investor",
            ListingType::DigitalAsset => "digital_asset",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "business" | "business_for_sale" => Some(ListingType::Business),
            "franchise" => Some(ListingType::Franchise),
            "startup" => Some(ListingType::Startup),
            "investor" => Some(ListingType::Investor),
            "digital_asset" | "digitalasset" => Some(ListingType::DigitalAsset),
            _ => None,
        }
    }
}

/// Variant-owned fields. Each listing type carries its own map; the set of
/// legal keys per variant comes from the schema catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields", rename_all = "snake_case")]
pub enum ListingDetails {
    Business(FieldMap),
    Franchise(FieldMap),
    Startup(FieldMap),
    Investor(FieldMap),
    DigitalAsset(FieldMap),
}

impl ListingDetails {
    pub fn empty(kind: ListingType) -> Self {
        Self::with_fields(kind, FieldMap::new())
    }

    pub fn with_fields(kind: ListingType, fields: FieldMap) -> Self {
        match kind {
            ListingType::Business => ListingDetails::Business(fields),
            ListingType::Franchise => ListingDetails::Franchise(fields),
            ListingType::Startup => ListingDetails::Startup(fields),
            ListingType::Investor => ListingDetails::Investor(fields),
            ListingType::DigitalAsset => ListingDetails::DigitalAsset(fields),
        }
    }

    pub fn kind(&self) -> ListingType {
        match self {
            ListingDetails::Business(_) => ListingType::Business,
            ListingDetails::Franchise(_) => ListingType::Franchise,
            ListingDetails::Startup(_) => ListingType::Startup,
            ListingDetails::Investor(_) => ListingType::Investor,
            ListingDetails::DigitalAsset(_) => ListingType::DigitalAsset,
        }
    }

    pub fn fields(&self) -> &FieldMap {
        match self {
            ListingDetails::Business(fields)
            | ListingDetails::Franchise(fields)
            | ListingDetails::Startup(fields)
            | ListingDetails::Investor(fields)
            | ListingDetails::DigitalAsset(fields) => fields,
        }
    }

    pub fn fields_mut(&mut self) -> &mut FieldMap {
        match self {
            ListingDetails::Business(fields)
            | ListingDetails::Franchise(fields)
            | ListingDetails::Startup(fields)
            | ListingDetails::Investor(fields)
            | ListingDetails::DigitalAsset(fields) => fields,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("at most {MAX_CLASSIFICATIONS} classifications are allowed")]
    TooManyClassifications,
    #[error("classification {0} does not exist")]
    MissingClassification(usize),
    #[error("no listing type selected")]
    NoListingType,
}

/// The in-progress listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingRecord {
    #[serde(default)]
    pub shared: FieldMap,
    #[serde(default)]
    pub classifications: Vec<ClassificationEntry>,
    #[serde(default)]
    pub details: Option<ListingDetails>,
}

impl ListingRecord {
    pub fn listing_type(&self) -> Option<ListingType> {
        self.details.as_ref().map(ListingDetails::kind)
    }

    pub fn get(&self, path: &FieldPath) -> FieldValue {
        if path.is_listing_type() {
            return self
                .listing_type()
                .map(|kind| FieldValue::text(kind.as_str()))
                .unwrap_or_default();
        }
        if path.as_str() == CLASSIFICATIONS_PATH {
            if self.classifications.is_empty() {
                return FieldValue::Empty;
            }
            return FieldValue::List(
                self.classifications
                    .iter()
                    .map(|entry| entry.industry.clone().unwrap_or_default())
                    .collect(),
            );
        }
        if let Some((index, level)) = path.parse_classification() {
            return self
                .classifications
                .get(index)
                .map(|entry| entry.get(level))
                .unwrap_or_default();
        }
        if let Some(value) = self.shared.get(path.as_str()) {
            return value.clone();
        }
        self.details
            .as_ref()
            .and_then(|details| details.fields().get(path.as_str()).cloned())
            .unwrap_or_default()
    }

    pub fn set_shared(&mut self, key: &str, value: FieldValue) {
        if value.is_empty() {
            self.shared.remove(key);
        } else {
            self.shared.insert(key.to_string(), value);
        }
    }

    pub fn set_detail(&mut self, key: &str, value: FieldValue) -> Result<(), RecordError> {
        let details = self.details.as_mut().ok_or(RecordError::NoListingType)?;
        if value.is_empty() {
            details.fields_mut().remove(key);
        } else {
            details.fields_mut().insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Empties a shared or detail key, whichever holds it.
    pub fn clear(&mut self, key: &str) {
        self.shared.remove(key);
        if let Some(details) = self.details.as_mut() {
            details.fields_mut().remove(key);
        }
    }

    /// Replaces the variant. Detail keys accepted by `keep` survive the switch;
    /// everything else that belonged to the old variant is dropped. Returns the
    /// dropped keys.
    pub fn switch_listing_type<F>(&mut self, kind: Option<ListingType>, keep: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let previous = self.details.take();
        let mut carried = FieldMap::new();
        let mut dropped = Vec::new();
        if let Some(previous) = previous {
            for (key, value) in previous.fields() {
                if kind.is_some() && keep(key) {
                    carried.insert(key.clone(), value.clone());
                } else {
                    dropped.push(key.clone());
                }
            }
        }
        self.details = kind.map(|kind| ListingDetails::with_fields(kind, carried));
        dropped
    }

    pub fn add_classification(&mut self) -> Result<usize, RecordError> {
        if self.classifications.len() >= MAX_CLASSIFICATIONS {
            return Err(RecordError::TooManyClassifications);
        }
        self.classifications.push(ClassificationEntry::default());
        Ok(self.classifications.len() - 1)
    }

    pub fn remove_classification(&mut self, index: usize) -> Result<ClassificationEntry, RecordError> {
        if index >= self.classifications.len() {
            return Err(RecordError::MissingClassification(index));
        }
        Ok(self.classifications.remove(index))
    }
}

impl std::fmt::Display for ListingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_type_parses_loose_spellings() {
        assert_eq!(ListingType::from_str("Digital-Asset"), Some(ListingType::DigitalAsset));
        assert_eq!(ListingType::from_str(" franchise "), Some(ListingType::Franchise));
        assert_eq!(ListingType::from_str("lemonade stand"), None);
    }

    #[test]
    fn switching_variant_keeps_only_accepted_keys() {
        let mut record = ListingRecord {
            details: Some(ListingDetails::empty(ListingType::Business)),
            ..ListingRecord::default()
        };
        record.set_shared("title", FieldValue::text("Corner cafe"));
        record
            .set_detail("asking_price", FieldValue::Number(250_000.0))
            .expect("detail");
        record
            .set_detail("location_type", FieldValue::text("leased"))
            .expect("detail");

        let dropped = record.switch_listing_type(Some(ListingType::DigitalAsset), |key| {
            key == "asking_price"
        });

        assert_eq!(dropped, vec!["location_type".to_string()]);
        assert_eq!(record.listing_type(), Some(ListingType::DigitalAsset));
        assert_eq!(
            record.get(&FieldPath::new("asking_price")),
            FieldValue::Number(250_000.0)
        );
        assert!(record.get(&FieldPath::new("location_type")).is_empty());
        assert_eq!(record.get(&FieldPath::new("title")), FieldValue::text("Corner cafe"));
    }

    #[test]
    fn classification_count_is_bounded() {
        let mut record = ListingRecord::default();
        for _ in 0..MAX_CLASSIFICATIONS {
            record.add_classification().expect("room left");
        }
        assert_eq!(
            record.add_classification(),
            Err(RecordError::TooManyClassifications)
        );
        assert!(record.remove_classification(7).is_err());
    }

    #[test]
    fn detail_writes_need_a_listing_type() {
        let mut record = ListingRecord::default();
        assert_eq!(
            record.set_detail("asking_price", FieldValue::Number(1.0)),
            Err(RecordError::NoListingType)
        );
    }
}
