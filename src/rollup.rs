use crate::metrics::MetricsFilter;
use crate::schema::{CostBreakdownCategory, EngineConfig, Mapping};
use crate::utils::safe_divide;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    BusinessLine,
    CostLine,
    SpendType,
    SubCategory,
}

impl HierarchyLevel {
    fn id_prefix(self) -> &'static str {
        match self {
            HierarchyLevel::BusinessLine => "bl",
            HierarchyLevel::CostLine => "cl",
            HierarchyLevel::SpendType => "st",
            HierarchyLevel::SubCategory => "sc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimateBasis {
    /// Placeholder of `budget * ratio` for a line with no mappings.
    BudgetShare { ratio: f64 },
    /// Rolled up from a mix of measured and estimated children.
    PartiallyEstimated,
}

/// Committed spend against a node, tagged with where the number came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RollupValue {
    Measured { value: f64 },
    Estimated { value: f64, basis: EstimateBasis },
    NoData,
}

impl RollupValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            RollupValue::Measured { value } | RollupValue::Estimated { value, .. } => Some(*value),
            RollupValue::NoData => None,
        }
    }

    pub fn value_or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, RollupValue::NoData)
    }

    /// Adds two child values. `NoData` is the identity; mixing in an estimate
    /// makes the result an estimate.
    pub fn combine(self, other: RollupValue) -> RollupValue {
        match (self, other) {
            (RollupValue::NoData, x) | (x, RollupValue::NoData) => x,
            (RollupValue::Measured { value: a }, RollupValue::Measured { value: b }) => {
                RollupValue::Measured { value: a + b }
            }
            (
                RollupValue::Estimated { value: a, basis: left },
                RollupValue::Estimated { value: b, basis: right },
            ) if left == right => RollupValue::Estimated {
                value: a + b,
                basis: left,
            },
            (a, b) => RollupValue::Estimated {
                value: a.value_or_zero() + b.value_or_zero(),
                basis: EstimateBasis::PartiallyEstimated,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdownNode {
    pub id: String,
    pub level: HierarchyLevel,
    pub name: String,
    pub budget: f64,
    /// Full committed amount (invoiced + open) mapped against this node.
    pub committed_actual: RollupValue,
    /// `budget - committed_actual`; `None` when there is no data.
    pub variance: Option<f64>,
    /// Committed as a percentage of budget; `None` when there is no data.
    pub utilization: Option<f64>,
    pub mapping_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category_ids: Vec<String>,
    #[serde(default)]
    pub children: Vec<CostBreakdownNode>,
}

impl CostBreakdownNode {
    fn leaf(id: String, name: String, leaf: LeafTotals, config: &EngineConfig) -> Self {
        let committed_actual = if leaf.mapping_count > 0 {
            RollupValue::Measured {
                value: leaf.committed,
            }
        } else if let Some(ratio) = config.unmapped_estimate_ratio {
            RollupValue::Estimated {
                value: leaf.budget * ratio,
                basis: EstimateBasis::BudgetShare { ratio },
            }
        } else {
            RollupValue::NoData
        };

        Self::with_derived(CostBreakdownNode {
            id,
            level: HierarchyLevel::SubCategory,
            name,
            budget: leaf.budget,
            committed_actual,
            variance: None,
            utilization: None,
            mapping_count: leaf.mapping_count,
            category_ids: leaf.category_ids,
            children: Vec::new(),
        })
    }

    fn parent(id: String, level: HierarchyLevel, name: String, children: Vec<Self>) -> Self {
        let budget = children.iter().map(|c| c.budget).sum();
        let mapping_count = children.iter().map(|c| c.mapping_count).sum();
        let committed_actual = children
            .iter()
            .fold(RollupValue::NoData, |acc, c| acc.combine(c.committed_actual.clone()));

        Self::with_derived(CostBreakdownNode {
            id,
            level,
            name,
            budget,
            committed_actual,
            variance: None,
            utilization: None,
            mapping_count,
            category_ids: Vec::new(),
            children,
        })
    }

    fn with_derived(mut self) -> Self {
        if let Some(committed) = self.committed_actual.value() {
            self.variance = Some(self.budget - committed);
            self.utilization = Some(safe_divide(committed, self.budget) * 100.0);
        }
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// All sub-category nodes beneath (or equal to) this node.
    pub fn leaves(&self) -> Vec<&CostBreakdownNode> {
        if self.is_leaf() {
            return vec![self];
        }
        self.children.iter().flat_map(|c| c.leaves()).collect()
    }

    pub fn find(&self, id: &str) -> Option<&CostBreakdownNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// A depth-first, table-friendly view of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyRow {
    pub depth: usize,
    pub id: String,
    pub level: HierarchyLevel,
    pub name: String,
    pub budget: f64,
    pub committed_actual: RollupValue,
    pub variance: Option<f64>,
    pub utilization: Option<f64>,
}

pub fn flatten_hierarchy(roots: &[CostBreakdownNode]) -> Vec<HierarchyRow> {
    fn visit(node: &CostBreakdownNode, depth: usize, rows: &mut Vec<HierarchyRow>) {
        rows.push(HierarchyRow {
            depth,
            id: node.id.clone(),
            level: node.level,
            name: node.name.clone(),
            budget: node.budget,
            committed_actual: node.committed_actual.clone(),
            variance: node.variance,
            utilization: node.utilization,
        });
        for child in &node.children {
            visit(child, depth + 1, rows);
        }
    }

    let mut rows = Vec::new();
    for root in roots {
        visit(root, 0, &mut rows);
    }
    rows
}

#[derive(Debug, Default)]
struct LeafTotals {
    budget: f64,
    committed: f64,
    mapping_count: usize,
    category_ids: Vec<String>,
}

// business line -> cost line -> spend type -> sub-category
type SubCategoryMap = BTreeMap<String, LeafTotals>;
type SpendTypeMap = BTreeMap<String, SubCategoryMap>;
type CostLineMap = BTreeMap<String, SpendTypeMap>;
type BusinessLineMap = BTreeMap<String, CostLineMap>;

/// Builds the business line -> cost line -> spend type -> sub-category tree.
///
/// Leaves are populated first, then every parent is summed from its children,
/// so each node's budget and committed value equal the sum over its leaves.
pub fn build_cost_hierarchy(
    categories: &[CostBreakdownCategory],
    mappings: &[Mapping],
    config: &EngineConfig,
    filter: &MetricsFilter,
) -> Vec<CostBreakdownNode> {
    let mut committed_by_category: HashMap<&str, (f64, usize)> = HashMap::new();
    for mapping in mappings {
        let entry = committed_by_category
            .entry(mapping.cost_breakdown_id.as_str())
            .or_default();
        entry.0 += mapping.mapped_amount;
        entry.1 += 1;
    }

    let mut grouped = BusinessLineMap::new();
    for category in categories.iter().filter(|c| filter.matches(c)) {
        let leaf = grouped
            .entry(category.business_line.clone())
            .or_default()
            .entry(category.cost_line.clone())
            .or_default()
            .entry(category.spend_type.clone())
            .or_default()
            .entry(category.sub_category.clone())
            .or_default();

        leaf.budget += category.budget_cost;
        leaf.category_ids.push(category.id.clone());
        if let Some(&(committed, count)) = committed_by_category.get(category.id.as_str()) {
            leaf.committed += committed;
            leaf.mapping_count += count;
        }
    }

    grouped
        .into_iter()
        .map(|(business_line, cost_lines)| {
            let bl_id = node_id(None, HierarchyLevel::BusinessLine, &business_line);
            let cost_line_nodes = cost_lines
                .into_iter()
                .map(|(cost_line, spend_types)| {
                    let cl_id = node_id(Some(&bl_id), HierarchyLevel::CostLine, &cost_line);
                    let spend_type_nodes = spend_types
                        .into_iter()
                        .map(|(spend_type, sub_categories)| {
                            let st_id =
                                node_id(Some(&cl_id), HierarchyLevel::SpendType, &spend_type);
                            let leaves = sub_categories
                                .into_iter()
                                .map(|(sub_category, totals)| {
                                    let id = node_id(
                                        Some(&st_id),
                                        HierarchyLevel::SubCategory,
                                        &sub_category,
                                    );
                                    CostBreakdownNode::leaf(id, sub_category, totals, config)
                                })
                                .collect();
                            CostBreakdownNode::parent(
                                st_id,
                                HierarchyLevel::SpendType,
                                spend_type,
                                leaves,
                            )
                        })
                        .collect();
                    CostBreakdownNode::parent(
                        cl_id,
                        HierarchyLevel::CostLine,
                        cost_line,
                        spend_type_nodes,
                    )
                })
                .collect();
            CostBreakdownNode::parent(
                bl_id,
                HierarchyLevel::BusinessLine,
                business_line,
                cost_line_nodes,
            )
        })
        .collect()
}

fn node_id(parent: Option<&str>, level: HierarchyLevel, name: &str) -> String {
    match parent {
        Some(parent) => format!("{}/{}:{}", parent, level.id_prefix(), name),
        None => format!("{}:{}", level.id_prefix(), name),
    }
}
