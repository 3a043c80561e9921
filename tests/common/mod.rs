#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use insight_router::dump_store::{row, DumpRecord, DumpStore, QueryPattern};
use insight_router::llm::{CompletionRequest, CompletionResponse, CompletionService};
use insight_router::CompletionError;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// In-process completion service that replays scripted replies and records
/// every request it receives. Once the script runs out it repeats `fallback`.
pub struct ScriptedService {
    script: Mutex<VecDeque<Result<CompletionResponse, CompletionError>>>,
    fallback: Result<CompletionResponse, CompletionError>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedService {
    pub fn always(reply: Result<CompletionResponse, CompletionError>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: reply,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: CompletionError) -> Arc<Self> {
        Self::always(Err(error))
    }

    pub fn replying(text: &str, tokens_used: u64) -> Arc<Self> {
        Self::always(Ok(CompletionResponse {
            text: text.to_string(),
            tokens_used,
        }))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        self.requests.lock().unwrap().push(request);
        tokio::task::yield_now().await;
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Signals when a call arrives, then never answers
pub struct StalledService {
    pub entered: Notify,
}

impl StalledService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { entered: Notify::new() })
    }
}

#[async_trait]
impl CompletionService for StalledService {
    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        self.entered.notify_one();
        std::future::pending().await
    }
}

pub const SALES_REPLY: &str = r#"Here is the analysis:
```json
{"summary": "EV volume fell at two Northeast dealers after a stock-out.",
 "data": [
  {"dealer": "Apex Motors", "region": "Northeast", "volume": 38},
  {"dealer": "Harbor Auto", "region": "Northeast", "volume": 41},
  {"dealer": "Sunbelt Cars", "region": "South", "volume": 77}
 ]}
```"#;

pub const WARRANTY_REPLY: &str = r#"{"summary": "Claims are concentrated on one model.",
 "data": [
  {"model": "Nexon EV", "claim": "battery", "count": 42},
  {"model": "Punch", "claim": "infotainment", "count": 17},
  {"model": "Harrier", "claim": "suspension", "count": 9}
 ]}"#;

pub fn top_models_pattern() -> QueryPattern {
    QueryPattern::new(
        "top_models_by_region",
        "sales",
        &["top selling", "models", "northeast", "week"],
        &["top selling models in the northeast this week"],
    )
}

pub fn top_models_record(version: u64) -> DumpRecord {
    DumpRecord::new(
        "top_models_by_region",
        "sales",
        vec![
            row([("model", json!("Nexon EV")), ("units", json!(412))]),
            row([("model", json!("Punch")), ("units", json!(388))]),
            row([("model", json!("Harrier")), ("units", json!(201))]),
        ],
        Utc::now() - Duration::hours(6),
        version,
    )
}

pub fn stock_pattern() -> QueryPattern {
    QueryPattern::new("stock_by_plant", "inventory", &["stock", "plant"], &[])
}

pub fn stock_record() -> DumpRecord {
    DumpRecord::new(
        "stock_by_plant",
        "inventory",
        vec![
            row([("plant", json!("Pune")), ("stock", json!(1_240))]),
            row([("plant", json!("Sanand")), ("stock", json!(860))]),
        ],
        Utc::now() - Duration::hours(2),
        3,
    )
}

/// KPI dumps for sales and inventory; warranty KPIs are not pre-computed
pub fn kpi_store() -> DumpStore {
    let patterns = vec![
        QueryPattern::new("sales_kpis", "kpi", &["sales kpis"], &[]),
        QueryPattern::new("inventory_kpis", "kpi", &["inventory kpis"], &[]),
    ];
    let records = vec![
        DumpRecord::new(
            "sales_kpis",
            "kpi",
            vec![
                row([("kpi", json!("retail units")), ("value", json!(18_450))]),
                row([("kpi", json!("ev mix pct")), ("value", json!(12.4))]),
            ],
            Utc::now(),
            7,
        ),
        DumpRecord::new(
            "inventory_kpis",
            "kpi",
            vec![
                row([("kpi", json!("days of stock")), ("value", json!(23))]),
                row([("kpi", json!("stock-outs")), ("value", json!(4))]),
            ],
            Utc::now(),
            5,
        ),
    ];
    DumpStore::new(patterns, records).unwrap()
}

pub fn sales_store() -> DumpStore {
    DumpStore::new(
        vec![top_models_pattern(), stock_pattern()],
        vec![top_models_record(1), stock_record()],
    )
    .unwrap()
}

pub fn inventory_only_store() -> DumpStore {
    DumpStore::new(vec![stock_pattern()], vec![stock_record()]).unwrap()
}
