mod common;

use common::*;
use insight_router::config::BudgetConfig;
use insight_router::token_budget::TokenBudgetManager;
use insight_router::{AnswerSource, QueryRouter, RouterConfig};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fallbacks_never_overspend() {
    let mut config = RouterConfig::default();
    config.budget = BudgetConfig {
        per_minute_limit: 50_000,
        per_day_limit: 2_000,
    };
    let budget = TokenBudgetManager::new(&config.budget);
    let service = ScriptedService::replying(SALES_REPLY, 480);
    let router = Arc::new(QueryRouter::with_budget(
        inventory_only_store(),
        service.clone(),
        Arc::clone(&budget),
        &config,
    ));

    let tasks: Vec<_> = (0..24)
        .map(|i| {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.route(&format!("sales for dealer {}", i)).await })
        })
        .collect();

    let mut spent = 0;
    let mut answered_by_model = 0;
    for task in tasks {
        let answer = task.await.unwrap().unwrap();
        assert!(!answer.data.is_empty());
        spent += answer.tokens_used;
        if answer.source == AnswerSource::Fallback {
            answered_by_model += 1;
        }
    }

    let status = budget.status();
    assert!(spent <= 2_000);
    assert_eq!(spent, status.per_day.tokens_used);
    assert_eq!(status.in_flight, 0);
    assert!(answered_by_model >= 1);
    assert_eq!(answered_by_model, service.calls());
}
