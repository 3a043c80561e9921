//! Business domain detection for fallback prompts and placeholder rows.

use crate::normalize::{normalize_query, tokens};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Sales,
    Inventory,
    Warranty,
    Kpi,
    Generic,
}

const SALES_TERMS: &[&str] = &[
    "sales", "sale", "sold", "selling", "revenue", "dealer", "dealers", "orders", "bookings",
    "retail", "units",
];
const INVENTORY_TERMS: &[&str] = &[
    "inventory", "stock", "plant", "plants", "component", "components", "parts", "warehouse",
    "supply", "shortage",
];
const WARRANTY_TERMS: &[&str] = &[
    "warranty", "claim", "claims", "defect", "defects", "recall", "repair", "repairs", "failure",
];
const KPI_TERMS: &[&str] = &[
    "kpi", "kpis", "metric", "metrics", "performance", "target", "scorecard",
];

impl Domain {
    /// Domain with the most cue words in the query; ties resolve in
    /// sales, inventory, warranty, KPI order
    pub fn detect(query: &str) -> Domain {
        let query_tokens = tokens(&normalize_query(query));
        let count = |terms: &[&str]| {
            query_tokens
                .iter()
                .filter(|t| terms.contains(&t.as_str()))
                .count()
        };

        let candidates = [
            (Domain::Sales, count(SALES_TERMS)),
            (Domain::Inventory, count(INVENTORY_TERMS)),
            (Domain::Warranty, count(WARRANTY_TERMS)),
            (Domain::Kpi, count(KPI_TERMS)),
        ];

        let mut best = (Domain::Generic, 0);
        for (domain, hits) in candidates {
            if hits > best.1 {
                best = (domain, hits);
            }
        }
        best.0
    }

    /// Column names answers in this domain should carry
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Domain::Sales => &["dealer", "region", "volume"],
            Domain::Inventory => &["plant", "component", "stock"],
            Domain::Warranty => &["model", "claim", "count"],
            Domain::Kpi => &["kpi", "value", "target"],
            Domain::Generic => &["label", "value"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Sales => "sales",
            Domain::Inventory => "inventory",
            Domain::Warranty => "warranty",
            Domain::Kpi => "kpi",
            Domain::Generic => "generic",
        }
    }
}
