use crate::error::{ReconciliationError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Fraction of a committed amount assumed to have hit P&L when a line item
/// carries no invoice tracking at all.
pub const DEFAULT_FALLBACK_INVOICE_RATIO: f64 = 0.6;

fn default_fallback_invoice_ratio() -> f64 {
    DEFAULT_FALLBACK_INVOICE_RATIO
}

/// Whether the source record carried invoice information, and what it said.
///
/// `Tracked` means the source schema had an invoice value column, even if the
/// value itself was null (then `invoiced_value` is 0.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvoiceTracking {
    Tracked { invoiced_value: f64 },
    Untracked,
}

/// Whether the source record carried a supplier promise date column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PromiseTracking {
    Tracked { promise_date: Option<NaiveDate> },
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedLineItem {
    pub id: String,
    pub purchase_order_id: Option<String>,
    pub line_value: f64,
    pub invoice: InvoiceTracking,
    pub invoice_date: Option<NaiveDate>,
    pub promise: PromiseTracking,
    pub created_at: Option<NaiveDate>,
}

impl NormalizedLineItem {
    pub fn has_invoice_field(&self) -> bool {
        matches!(self.invoice, InvoiceTracking::Tracked { .. })
    }

    pub fn has_promise_field(&self) -> bool {
        matches!(self.promise, PromiseTracking::Tracked { .. })
    }

    pub fn invoiced_value(&self) -> Option<f64> {
        match self.invoice {
            InvoiceTracking::Tracked { invoiced_value } => Some(invoiced_value),
            InvoiceTracking::Untracked => None,
        }
    }

    pub fn promise_date(&self) -> Option<NaiveDate> {
        match self.promise {
            PromiseTracking::Tracked { promise_date } => promise_date,
            PromiseTracking::Untracked => None,
        }
    }

    /// Invoice date, falling back to the record's creation date.
    pub fn effective_invoice_date(&self) -> Option<NaiveDate> {
        self.invoice_date.or(self.created_at)
    }
}

/// One committed allocation of (part of) a PO line item to a budget category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    #[serde(alias = "mapped_amount")]
    pub mapped_amount: f64,
    #[serde(alias = "po_line_item_id", deserialize_with = "deserialize_id")]
    #[schemars(with = "String")]
    pub po_line_item_id: String,
    #[serde(alias = "cost_breakdown_id", deserialize_with = "deserialize_id")]
    #[schemars(with = "String")]
    pub cost_breakdown_id: String,
}

/// Record ids arrive as strings or numbers depending on the source.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text.trim().to_string(),
        RawId::Number(number) => number_to_id(&number),
    })
}

/// Text form of a numeric id. Integral floats drop their fraction, so `42.0`
/// and `42` name the same record.
pub(crate) fn number_to_id(number: &serde_json::Number) -> String {
    if let Some(i) = number.as_i64() {
        return i.to_string();
    }
    if let Some(u) = number.as_u64() {
        return u.to_string();
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
        _ => number.to_string(),
    }
}

impl Mapping {
    pub fn new(
        mapped_amount: f64,
        po_line_item_id: impl Into<String>,
        cost_breakdown_id: impl Into<String>,
    ) -> Self {
        Self {
            mapped_amount,
            po_line_item_id: po_line_item_id.into(),
            cost_breakdown_id: cost_breakdown_id.into(),
        }
    }
}

/// A leaf budget line. The four name fields form the hierarchy key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdownCategory {
    pub id: String,
    #[serde(alias = "subBusinessLine", alias = "sub_business_line", alias = "business_line")]
    pub business_line: String,
    #[serde(alias = "cost_line")]
    pub cost_line: String,
    #[serde(alias = "spend_type")]
    pub spend_type: String,
    #[serde(alias = "spendSubCategory", alias = "spend_sub_category", alias = "sub_category")]
    pub sub_category: String,
    #[serde(default, alias = "budget_cost")]
    pub budget_cost: f64,
}

/// One row of a versioned cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotItem {
    pub id: String,
    #[serde(default, alias = "budgetCost")]
    pub budget_cost: f64,
    #[serde(default, alias = "forecastedCost", skip_serializing_if = "Option::is_none")]
    pub forecasted_cost: Option<f64>,
}

impl SnapshotItem {
    pub fn new(id: impl Into<String>, budget_cost: f64, forecasted_cost: Option<f64>) -> Self {
        Self {
            id: id.into(),
            budget_cost,
            forecasted_cost,
        }
    }

    /// The value this row contributes to a forecast: the forecast if present,
    /// otherwise the budget.
    pub fn effective_cost(&self) -> f64 {
        self.forecasted_cost.unwrap_or(self.budget_cost)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CostBreakdownSnapshot {
    #[serde(alias = "versionNumber")]
    pub version_number: u32,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    pub items: Vec<SnapshotItem>,
}

/// A not-yet-saved cost line added while staging a forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DraftEntry {
    pub id: String,
    #[serde(default, alias = "budgetCost")]
    pub budget_cost: f64,
}

impl DraftEntry {
    pub fn new(id: impl Into<String>, budget_cost: f64) -> Self {
        Self {
            id: id.into(),
            budget_cost,
        }
    }
}

/// Anything with an id and a budgeted cost.
pub trait BudgetLine {
    fn line_id(&self) -> &str;
    fn budget_cost(&self) -> f64;
}

impl BudgetLine for CostBreakdownCategory {
    fn line_id(&self) -> &str {
        &self.id
    }

    fn budget_cost(&self) -> f64 {
        self.budget_cost
    }
}

impl BudgetLine for SnapshotItem {
    fn line_id(&self) -> &str {
        &self.id
    }

    fn budget_cost(&self) -> f64 {
        self.budget_cost
    }
}

impl BudgetLine for DraftEntry {
    fn line_id(&self) -> &str {
        &self.id
    }

    fn budget_cost(&self) -> f64 {
        self.budget_cost
    }
}

/// Per-call engine settings. Nothing here is read from globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    #[serde(default = "default_fallback_invoice_ratio")]
    #[schemars(
        description = "Fraction (0.0-1.0) of a committed amount treated as already invoiced when the line item has no invoice tracking. Defaults to 0.6."
    )]
    pub fallback_invoice_ratio: f64,

    #[schemars(description = "Date the project started; burn rate is measured from here.")]
    pub project_start: NaiveDate,

    #[schemars(description = "Reference date for elapsed-time calculations (usually today).")]
    pub as_of: NaiveDate,

    #[serde(default)]
    #[schemars(
        description = "Opt-in placeholder: when set, budget lines without any mappings report an Estimated committed value of budget * ratio instead of NoData."
    )]
    pub unmapped_estimate_ratio: Option<f64>,
}

impl EngineConfig {
    pub fn new(project_start: NaiveDate, as_of: NaiveDate) -> Self {
        Self {
            fallback_invoice_ratio: DEFAULT_FALLBACK_INVOICE_RATIO,
            project_start,
            as_of,
            unmapped_estimate_ratio: None,
        }
    }

    pub fn with_fallback_invoice_ratio(mut self, ratio: f64) -> Self {
        self.fallback_invoice_ratio = ratio;
        self
    }

    pub fn with_unmapped_estimate_ratio(mut self, ratio: f64) -> Self {
        self.unmapped_estimate_ratio = Some(ratio);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !is_unit_ratio(self.fallback_invoice_ratio) {
            return Err(ReconciliationError::InvalidFallbackRatio(
                self.fallback_invoice_ratio,
            ));
        }

        if let Some(ratio) = self.unmapped_estimate_ratio {
            if !is_unit_ratio(ratio) {
                return Err(ReconciliationError::InvalidEstimateRatio(ratio));
            }
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = schemars::schema_for!(EngineConfig);
        serde_json::to_string_pretty(&schema)
    }
}

fn is_unit_ratio(ratio: f64) -> bool {
    ratio.is_finite() && (0.0..=1.0).contains(&ratio)
}

/// Everything the engine needs about one project, already fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProjectData {
    #[serde(default)]
    pub categories: Vec<CostBreakdownCategory>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub line_items: Vec<NormalizedLineItem>,
}

impl ProjectData {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ProjectData)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = EngineConfig::new(date(2024, 1, 1), date(2024, 6, 1));
        assert_eq!(config.fallback_invoice_ratio, 0.6);
        assert!(config.validate().is_ok());

        let bad = config.clone().with_fallback_invoice_ratio(1.5);
        assert!(matches!(
            bad.validate(),
            Err(ReconciliationError::InvalidFallbackRatio(r)) if r == 1.5
        ));

        let bad = config.with_unmapped_estimate_ratio(f64::NAN);
        assert!(matches!(
            bad.validate(),
            Err(ReconciliationError::InvalidEstimateRatio(_))
        ));
    }

    #[test]
    fn test_config_from_json() {
        let config =
            EngineConfig::from_json(r#"{"project_start": "2024-01-01", "as_of": "2024-03-15"}"#)
                .unwrap();
        assert_eq!(config.fallback_invoice_ratio, DEFAULT_FALLBACK_INVOICE_RATIO);
        assert_eq!(config.unmapped_estimate_ratio, None);

        let err = EngineConfig::from_json(
            r#"{"project_start": "2024-01-01", "as_of": "2024-03-15", "fallback_invoice_ratio": -0.1}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_category_accepts_external_field_names() {
        let json = r#"{
            "id": "cb-1",
            "subBusinessLine": "Retail",
            "costLine": "Capex",
            "spendType": "Hardware",
            "spendSubCategory": "Servers",
            "budgetCost": 1000.0
        }"#;
        let category: CostBreakdownCategory = serde_json::from_str(json).unwrap();
        assert_eq!(category.business_line, "Retail");
        assert_eq!(category.sub_category, "Servers");
        assert_eq!(category.budget_cost, 1000.0);
    }

    #[test]
    fn test_mapping_accepts_numeric_ids() {
        let mappings: Vec<Mapping> = serde_json::from_str(
            r#"[
                {"mappedAmount": 10, "poLineItemId": 42, "costBreakdownId": 7.0},
                {"mapped_amount": 5, "po_line_item_id": " li-9 ", "cost_breakdown_id": "c1"}
            ]"#,
        )
        .unwrap();

        assert_eq!(mappings[0], Mapping::new(10.0, "42", "7"));
        assert_eq!(mappings[1], Mapping::new(5.0, "li-9", "c1"));

        let bad: std::result::Result<Mapping, _> = serde_json::from_str(
            r#"{"mappedAmount": 1, "poLineItemId": true, "costBreakdownId": "c1"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_snapshot_item_effective_cost() {
        let item: SnapshotItem = serde_json::from_str(r#"{"id": "1", "budget_cost": 100}"#).unwrap();
        assert_eq!(item.effective_cost(), 100.0);
        let item = SnapshotItem::new("1", 100.0, Some(80.0));
        assert_eq!(item.effective_cost(), 80.0);
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = ProjectData::schema_as_json().unwrap();
        assert!(schema_json.contains("categories"));
        assert!(schema_json.contains("line_items"));

        let config_schema = EngineConfig::schema_as_json().unwrap();
        assert!(config_schema.contains("fallback_invoice_ratio"));
    }
}
