use once_cell::sync::Lazy;
use regex::Regex;

use crate::record::{ClassificationLevel, ListingType, MAX_CLASSIFICATIONS};
use crate::record::classification::MAX_SUBCATEGORIES;
use crate::schema::rules::{Constraint, FieldRule, Predicate};
use crate::schema::steps::StepId;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$").expect("email pattern compiles")
});

static HTTP_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("url pattern compiles"));

static POSTAL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 \-]{1,9}$").expect("postal pattern compiles"));

pub const LISTING_TYPES: &[&str] = &["business", "franchise", "startup", "investor", "digital_asset"];
const LOCATION_TYPES: &[&str] = &["owned", "leased", "home_based", "online"];
const STARTUP_STAGES: &[&str] = &["idea", "mvp", "revenue", "growth"];
const INVESTOR_TYPES: &[&str] = &[
    "individual",
    "angel",
    "venture_capital",
    "private_equity",
    "family_office",
];
const ASSET_KINDS: &[&str] = &["website", "app", "saas", "ecommerce", "content", "domain"];

fn shared_rules(listing_type: ListingType) -> Vec<FieldRule> {
    let mut rules = vec![
        FieldRule::discriminant("listing_type", "Listing type", StepId::Basics)
            .required()
            .one_of(LISTING_TYPES),
        FieldRule::shared("title", "Title", StepId::Basics)
            .required()
            .length(Some(5), Some(120)),
        FieldRule::shared("summary", "Summary", StepId::Basics)
            .required()
            .length(Some(20), Some(2000)),
        FieldRule::shared("contact_email", "Contact email", StepId::Basics)
            .required()
            .pattern(Lazy::force(&EMAIL), "a valid email address"),
    ];

    if listing_type != ListingType::DigitalAsset {
        rules.push(
            FieldRule::shared("location_country", "Country", StepId::Basics)
                .required()
                .length(Some(2), Some(56)),
        );
        rules.push(
            FieldRule::shared("location_postal_code", "Postal code", StepId::Basics)
                .pattern(Lazy::force(&POSTAL_CODE), "a postal code"),
        );
    }

    if listing_type != ListingType::Investor {
        rules.push(
            FieldRule::classification_list("classifications", "Classifications")
                .required()
                .items(1, MAX_CLASSIFICATIONS),
        );
        rules.push(
            FieldRule::classification(
                "classifications.*.industry",
                "Industry",
                ClassificationLevel::Industry,
            )
            .required()
            .constraint(Constraint::KnownIndustry),
        );
        rules.push(
            FieldRule::classification(
                "classifications.*.category",
                "Category",
                ClassificationLevel::Category,
            )
            .required()
            .constraint(Constraint::CategoryOption),
        );
        rules.push(
            FieldRule::classification(
                "classifications.*.subcategories",
                "Subcategories",
                ClassificationLevel::Subcategories,
            )
            .required()
            .items(1, MAX_SUBCATEGORIES)
            .constraint(Constraint::SubcategoryOptions),
        );
    }

    rules.push(
        FieldRule::shared("video_url", "Video link", StepId::Media)
            .pattern(Lazy::force(&HTTP_URL), "an http(s) link"),
    );
    rules
}

fn business_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::variant("asking_price", "Asking price", StepId::Details)
            .required()
            .range(Some(1.0), Some(10_000_000_000.0)),
        FieldRule::variant("annual_revenue", "Annual revenue", StepId::Details)
            .range(Some(0.0), None),
        FieldRule::variant("established_year", "Year established", StepId::Details)
            .required()
            .range(Some(1800.0), Some(2100.0)),
        FieldRule::variant("employee_count", "Employees", StepId::Details)
            .range(Some(0.0), Some(1_000_000.0)),
        FieldRule::variant("location_type", "Premises", StepId::Details)
            .required()
            .one_of(LOCATION_TYPES),
        FieldRule::variant("lease_monthly_cost", "Monthly lease cost", StepId::Details)
            .required_when(Predicate::Equals("location_type", "leased"))
            .range(Some(1.0), None),
        FieldRule::variant("lease_expiry_year", "Lease expiry year", StepId::Details)
            .required_when(Predicate::Equals("location_type", "leased"))
            .range(Some(2000.0), Some(2200.0)),
        FieldRule::variant("reason_for_selling", "Reason for selling", StepId::Details)
            .length(None, Some(1000)),
    ]
}

fn franchise_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::variant("franchise_fee", "Franchise fee", StepId::Details)
            .required()
            .range(Some(1.0), None),
        FieldRule::variant("royalty_percent", "Royalty", StepId::Details)
            .required()
            .range(Some(0.0), Some(100.0)),
        FieldRule::variant("total_units", "Units in operation", StepId::Details)
            .required()
            .range(Some(1.0), None),
        FieldRule::variant("offers_financing", "Financing available", StepId::Details),
        FieldRule::variant("financing_terms", "Financing terms", StepId::Details)
            .required_when(Predicate::IsTrue("offers_financing"))
            .length(Some(10), Some(1000)),
        FieldRule::variant("term_years", "Agreement term", StepId::Terms)
            .required()
            .range(Some(1.0), Some(50.0)),
        FieldRule::variant("territory_exclusive", "Exclusive territory", StepId::Terms),
        FieldRule::variant("territory_description", "Territory", StepId::Terms)
            .required_when(Predicate::IsTrue("territory_exclusive"))
            .length(Some(5), Some(500)),
        FieldRule::variant("training_provided", "Training", StepId::Terms).length(None, Some(1000)),
    ]
}

fn startup_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::variant("stage", "Stage", StepId::Details)
            .required()
            .one_of(STARTUP_STAGES),
        FieldRule::variant("funding_sought", "Funding sought", StepId::Details)
            .required()
            .range(Some(1.0), None),
        FieldRule::variant("equity_offered_percent", "Equity offered", StepId::Details)
            .required()
            .range(Some(0.0), Some(100.0)),
        FieldRule::variant("monthly_recurring_revenue", "Monthly recurring revenue", StepId::Details)
            .required_when(Predicate::AnyOf("stage", &["revenue", "growth"]))
            .range(Some(0.0), None),
        FieldRule::variant("team_size", "Team size", StepId::Details).range(Some(1.0), None),
        FieldRule::variant("pitch_deck_url", "Pitch deck link", StepId::Details)
            .pattern(Lazy::force(&HTTP_URL), "an http(s) link"),
    ]
}

fn investor_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::variant("investor_type", "Investor type", StepId::Details)
            .required()
            .one_of(INVESTOR_TYPES),
        FieldRule::variant("firm_name", "Firm name", StepId::Details)
            .required_when(Predicate::AnyOf(
                "investor_type",
                &["venture_capital", "private_equity", "family_office"],
            ))
            .length(Some(2), Some(120)),
        FieldRule::variant("ticket_min", "Minimum ticket", StepId::Details)
            .required()
            .range(Some(1.0), None),
        FieldRule::variant("ticket_max", "Maximum ticket", StepId::Details)
            .required()
            .range(Some(1.0), None)
            .at_least("ticket_min"),
        FieldRule::variant("preferred_industries", "Preferred industries", StepId::Details)
            .items(0, 5),
    ]
}

fn digital_asset_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::variant("asset_kind", "Asset type", StepId::Details)
            .required()
            .one_of(ASSET_KINDS),
        FieldRule::variant("asking_price", "Asking price", StepId::Details)
            .required()
            .range(Some(1.0), Some(10_000_000_000.0)),
        FieldRule::variant("monthly_revenue", "Monthly revenue", StepId::Details)
            .required()
            .range(Some(0.0), None),
        FieldRule::variant("monthly_traffic", "Monthly visitors", StepId::Details)
            .range(Some(0.0), None),
        FieldRule::variant("domain_url", "Site address", StepId::Details)
            .required_when(Predicate::AnyOf(
                "asset_kind",
                &["website", "ecommerce", "content", "domain"],
            ))
            .pattern(Lazy::force(&HTTP_URL), "an http(s) link"),
        FieldRule::variant("tech_stack", "Tech stack", StepId::Details).length(None, Some(500)),
    ]
}

pub fn rules_for(listing_type: ListingType) -> Vec<FieldRule> {
    let mut rules = shared_rules(listing_type);
    rules.extend(match listing_type {
        ListingType::Business => business_rules(),
        ListingType::Franchise => franchise_rules(),
        ListingType::Startup => startup_rules(),
        ListingType::Investor => investor_rules(),
        ListingType::DigitalAsset => digital_asset_rules(),
    });
    rules
}
