use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("taxonomy request failed: {0}")]
    Request(String),
    #[error("unknown industry: {0}")]
    UnknownIndustry(String),
}

impl TaxonomyError {
    pub fn kind(&self) -> &'static str {
        match self {
            TaxonomyError::Request(_) => "upstream",
            TaxonomyError::UnknownIndustry(_) => "not_found",
        }
    }
}

/// Source of the dependent option lists behind the classification fields.
#[async_trait]
pub trait TaxonomyProvider: Send + Sync {
    async fn industries(&self) -> Result<Vec<String>, TaxonomyError>;
    async fn categories(&self, industry: &str) -> Result<Vec<String>, TaxonomyError>;
    async fn subcategories(
        &self,
        industry: &str,
        category: &str,
    ) -> Result<Vec<String>, TaxonomyError>;
}

#[derive(Clone, Copy)]
pub struct IndustryDefinition {
    name: &'static str,
    categories: &'static [CategoryDefinition],
}

#[derive(Clone, Copy)]
pub struct CategoryDefinition {
    name: &'static str,
    subcategories: &'static [&'static str],
}

const INDUSTRY_POOL: [IndustryDefinition; 5] = [
    IndustryDefinition {
        name: "Food & Beverage",
        categories: &[
            CategoryDefinition {
                name: "Restaurants",
                subcategories: &["Cafe", "Bakery", "Fine Dining", "Quick Service"],
            },
            CategoryDefinition {
                name: "Catering",
                subcategories: &["Corporate", "Events", "Meal Prep"],
            },
        ],
    },
    IndustryDefinition {
        name: "Retail",
        categories: &[
            CategoryDefinition {
                name: "Apparel",
                subcategories: &["Footwear", "Boutique", "Accessories"],
            },
            CategoryDefinition {
                name: "Convenience",
                subcategories: &["Grocery", "Liquor", "Pharmacy"],
            },
        ],
    },
    IndustryDefinition {
        name: "Technology",
        categories: &[
            CategoryDefinition {
                name: "Software",
                subcategories: &["SaaS", "Mobile Apps", "Developer Tools"],
            },
            CategoryDefinition {
                name: "IT Services",
                subcategories: &["Managed Services", "Consulting", "Security"],
            },
        ],
    },
    IndustryDefinition {
        name: "Health & Wellness",
        categories: &[
            CategoryDefinition {
                name: "Fitness",
                subcategories: &["Gym", "Yoga Studio", "Personal Training"],
            },
            CategoryDefinition {
                name: "Clinics",
                subcategories: &["Dental", "Physiotherapy", "Veterinary"],
            },
        ],
    },
    IndustryDefinition {
        name: "Services",
        categories: &[
            CategoryDefinition {
                name: "Cleaning",
                subcategories: &["Residential", "Commercial"],
            },
            CategoryDefinition {
                name: "Automotive",
                subcategories: &["Repair", "Detailing", "Car Wash"],
            },
        ],
    },
];

/// Built-in catalogue used when no remote taxonomy is configured.
#[derive(Clone)]
pub struct StaticTaxonomy {
    pool: &'static [IndustryDefinition],
}

impl Default for StaticTaxonomy {
    fn default() -> Self {
        Self {
            pool: &INDUSTRY_POOL,
        }
    }
}

impl StaticTaxonomy {
    fn industry(&self, name: &str) -> Result<&'static IndustryDefinition, TaxonomyError> {
        self.pool
            .iter()
            .find(|industry| industry.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| TaxonomyError::UnknownIndustry(name.to_string()))
    }
}

#[async_trait]
impl TaxonomyProvider for StaticTaxonomy {
    async fn industries(&self) -> Result<Vec<String>, TaxonomyError> {
        Ok(self.pool.iter().map(|i| i.name.to_string()).collect())
    }

    async fn categories(&self, industry: &str) -> Result<Vec<String>, TaxonomyError> {
        Ok(self
            .industry(industry)?
            .categories
            .iter()
            .map(|c| c.name.to_string())
            .collect())
    }

    async fn subcategories(
        &self,
        industry: &str,
        category: &str,
    ) -> Result<Vec<String>, TaxonomyError> {
        Ok(self
            .industry(industry)?
            .categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(category.trim()))
            .map(|c| c.subcategories.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OptionListResponse {
    #[serde(default)]
    options: Vec<OptionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct OptionEntry {
    label: String,
}

/// Remote option lists served at `{base}/industries[/{industry}[/{category}]]`.
#[derive(Debug, Clone)]
pub struct HttpTaxonomy {
    base_url: String,
    http: Client,
}

impl HttpTaxonomy {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("TAXONOMY_URL").ok()?;
        Some(Self::new(base_url))
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: build_client(),
        }
    }

    async fn fetch(&self, url: String) -> Result<Vec<String>, TaxonomyError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| TaxonomyError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(TaxonomyError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: OptionListResponse = response
            .json()
            .await
            .map_err(|err| TaxonomyError::Request(err.to_string()))?;
        Ok(payload.options.into_iter().map(|o| o.label).collect())
    }
}

#[async_trait]
impl TaxonomyProvider for HttpTaxonomy {
    async fn industries(&self) -> Result<Vec<String>, TaxonomyError> {
        self.fetch(format!("{}/industries", self.base_url)).await
    }

    async fn categories(&self, industry: &str) -> Result<Vec<String>, TaxonomyError> {
        self.fetch(format!("{}/industries/{}", self.base_url, encode(industry)))
            .await
    }

    async fn subcategories(
        &self,
        industry: &str,
        category: &str,
    ) -> Result<Vec<String>, TaxonomyError> {
        self.fetch(format!(
            "{}/industries/{}/{}",
            self.base_url,
            encode(industry),
            encode(category)
        ))
        .await
    }
}

/// Which option list a fetch resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Industries,
    Categories { industry: String },
    Subcategories { industry: String, category: String },
}

impl OptionKey {
    pub async fn fetch(&self, provider: &dyn TaxonomyProvider) -> Result<Vec<String>, TaxonomyError> {
        match self {
            OptionKey::Industries => provider.industries().await,
            OptionKey::Categories { industry } => provider.categories(industry).await,
            OptionKey::Subcategories { industry, category } => {
                provider.subcategories(industry, category).await
            }
        }
    }
}

/// Option lists loaded so far. A missing list means "not known yet", which
/// the validator treats as no constraint.
#[derive(Debug, Clone, Default)]
pub struct OptionCache {
    lists: HashMap<OptionKey, Vec<String>>,
}

impl OptionCache {
    pub fn insert(&mut self, key: OptionKey, options: Vec<String>) {
        self.lists.insert(key, options);
    }

    pub fn contains(&self, key: &OptionKey) -> bool {
        self.lists.contains_key(key)
    }

    pub fn get(&self, key: &OptionKey) -> Option<&[String]> {
        self.lists.get(key).map(Vec::as_slice)
    }

    pub fn industries(&self) -> Option<&[String]> {
        self.get(&OptionKey::Industries)
    }

    pub fn categories(&self, industry: &str) -> Option<&[String]> {
        self.get(&OptionKey::Categories {
            industry: industry.to_string(),
        })
    }

    pub fn subcategories(&self, industry: &str, category: &str) -> Option<&[String]> {
        self.get(&OptionKey::Subcategories {
            industry: industry.to_string(),
            category: category.to_string(),
        })
    }
}

pub fn contains_option(options: &[String], value: &str) -> bool {
    options.iter().any(|o| o.eq_ignore_ascii_case(value.trim()))
}
