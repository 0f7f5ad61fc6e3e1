use super::*;
use async_trait::async_trait;
use sku_harvester::models::{Combination, CombinationResult, CombinationStatus};
use sku_harvester::oracle::{OracleState, ScriptedOracle};
use sku_harvester::{Oracle, OracleError, ResultAggregator, TraversalController, TraversalEnd};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

fn combo(indices: &[usize]) -> Combination {
    Combination::new(indices.to_vec())
}

#[tokio::test]
async fn test_visits_every_combination_in_order() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone());

    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;

    assert_eq!(outcome.end, TraversalEnd::Completed);
    let order: Vec<String> = outcome.results.iter().map(|r| r.combination.to_string()).collect();
    assert_eq!(order, vec!["(0,0)", "(0,1)", "(0,2)", "(1,0)", "(1,1)", "(1,2)"]);

    let prices: Vec<_> = outcome.results.iter().map(|r| r.price).collect();
    let expected: Vec<_> = (100..106).map(|p| Some(Decimal::from(p))).collect();
    assert_eq!(prices, expected);
    assert_eq!(oracle.reads().await, 6);
    println!("✓ Visited all {} combinations once", outcome.results.len());
    Ok(())
}

#[tokio::test]
async fn test_capped_run_is_prefix_of_full_run() -> anyhow::Result<()> {
    let model = sample_model();
    let full_oracle = ScriptedOracle::new(model.clone());
    let full = TraversalController::new(&full_oracle, &model, test_options()).run().await;

    let capped_oracle = ScriptedOracle::new(model.clone());
    let options = TraversalOptions {
        max_combinations: Some(4),
        ..test_options()
    };
    let capped = TraversalController::new(&capped_oracle, &model, options).run().await;

    assert_eq!(capped.end, TraversalEnd::Completed);
    assert_eq!(capped.results.len(), 4);
    assert_eq!(capped.results.as_slice(), &full.results[..4]);
    Ok(())
}

#[tokio::test]
async fn test_minimal_selection_changes() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone());

    TraversalController::new(&oracle, &model, test_options()).run().await;

    let calls = oracle.calls().await;
    // First combination applies both dimensions, (1,0) applies both, every other step one
    assert_eq!(calls.len(), 8);
    let step: Vec<(usize, usize)> = calls[2..3].iter().map(|c| (c.dimension, c.option)).collect();
    assert_eq!(step, vec![(1, 1)]);
    // The surface starts on the baseline, so the first two applies change nothing
    assert_eq!(oracle.state_changes().await, 6);
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_are_retried() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone()).fail_transiently(1, 2, 2);

    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;

    let result = &outcome.results[2];
    assert_eq!(result.combination, combo(&[0, 2]));
    assert_eq!(result.status, CombinationStatus::Ok);
    assert_eq!(result.attempts, 3);
    assert_eq!(outcome.stats.retries, 2);
    Ok(())
}

#[tokio::test]
async fn test_unsettled_combination_fails_and_traversal_continues() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone()).unsettled(combo(&[0, 1]), 10);

    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;

    assert_eq!(outcome.end, TraversalEnd::Completed);
    let failed = &outcome.results[1];
    assert_eq!(failed.status, CombinationStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(oracle.resets().await, 1);

    let statuses: Vec<_> = outcome.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses.iter().filter(|s| **s == CombinationStatus::Ok).count(), 5);
    Ok(())
}

#[tokio::test]
async fn test_rejected_and_sold_out_combinations_are_unavailable() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone())
        .reject_option(1, 1)
        .mark_unavailable(combo(&[1, 2]));

    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;

    let unavailable: Vec<String> = outcome
        .results
        .iter()
        .filter(|r| r.status == CombinationStatus::Unavailable)
        .map(|r| r.combination.to_string())
        .collect();
    assert_eq!(unavailable, vec!["(0,1)", "(1,1)", "(1,2)"]);
    assert!(outcome.results.iter().all(|r| r.attempts == 1));
    assert_eq!(oracle.resets().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_detached_surface_aborts_with_partial_results() -> anyhow::Result<()> {
    let model = sample_model();
    // Apply attempts: (0,0) uses 1 and 2, (0,1) uses 3, (0,2) hits 4
    let oracle = ScriptedOracle::new(model.clone()).detach_after(4);

    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;

    assert!(outcome.end.is_aborted());
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.iter().all(|r| r.is_ok()));

    let mut aggregator = ResultAggregator::new(model);
    aggregator.absorb(outcome)?;
    let summary = aggregator.summary();
    assert_eq!(summary.ok, 2);
    assert_eq!(summary.missing, 4);
    assert!(summary.end.as_ref().is_some_and(TraversalEnd::is_aborted));
    println!("✓ Partial results preserved after detach");
    Ok(())
}

#[tokio::test]
async fn test_images_are_deduplicated() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone())
        .with_image(combo(&[0, 0]), "//img.example.com/red.jpg")
        .with_image(combo(&[0, 1]), "https://img.example.com/red.jpg")
        .with_image(combo(&[0, 2]), "https://img.example.com/red.jpg")
        .with_image(combo(&[1, 0]), "https://img.example.com/blue.jpg")
        .with_image(combo(&[1, 1]), "https://img.example.com/blue.jpg");

    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;

    assert_eq!(outcome.images.len(), 2);
    assert_eq!(outcome.results[0].image, outcome.results[2].image);
    assert_ne!(outcome.results[0].image, outcome.results[3].image);
    assert!(outcome.results[5].image.is_none());

    let mut aggregator = ResultAggregator::new(model);
    aggregator.absorb(outcome)?;
    let bundle = aggregator.finish();
    assert_eq!(bundle.images[0].url, "https://img.example.com/red.jpg");
    assert_eq!(bundle.images[1].url, "https://img.example.com/blue.jpg");
    Ok(())
}

#[tokio::test]
async fn test_resumed_jump_reapplies_cleared_dimensions() -> anyhow::Result<()> {
    let model = sample_model();
    // Changing Color resets Size to its first option on this surface
    let oracle = ScriptedOracle::new(model.clone()).cascading();
    let prior = vec![
        CombinationResult::ok(combo(&[1, 0]), Some(Decimal::from(103)), None, None, 1),
        CombinationResult::ok(combo(&[1, 1]), Some(Decimal::from(104)), None, None, 1),
    ];

    let outcome = TraversalController::new(&oracle, &model, test_options())
        .seed_prior(prior)?
        .run()
        .await;

    assert_eq!(outcome.end, TraversalEnd::Completed);
    let last = outcome.results.last().expect("(1,2) recorded");
    assert_eq!(last.combination, combo(&[1, 2]));
    assert_eq!(last.price, Some(Decimal::from(105)));
    assert_eq!(oracle.active().await, combo(&[1, 2]));
    assert_eq!(outcome.stats.confirm_calls, 1);
    println!("✓ Cleared dimension was applied again after the jump");
    Ok(())
}

#[tokio::test]
async fn test_jump_applies_dimensions_in_order() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone()).cascading();
    let prior = vec![CombinationResult::ok(combo(&[1, 0]), None, None, None, 1)];

    let outcome = TraversalController::new(&oracle, &model, test_options())
        .seed_prior(prior)?
        .run()
        .await;

    // (0,2) -> (1,1) changes both dimensions; (1,1) -> (1,2) only Size
    let prices: Vec<_> = outcome.results.iter().map(|r| r.price).collect();
    let expected: Vec<_> = [100, 101, 102, 104, 105]
        .into_iter()
        .map(|p| Some(Decimal::from(p)))
        .collect();
    assert_eq!(prices, expected);
    Ok(())
}

/// Cancels the run once the surface has been read `after` times.
struct CancelAfterReads {
    inner: ScriptedOracle,
    token: CancellationToken,
    after: usize,
    reads: AtomicUsize,
}

#[async_trait]
impl Oracle for CancelAfterReads {
    async fn apply_selection(&self, dimension: usize, option: &SkuOption) -> std::result::Result<(), OracleError> {
        self.inner.apply_selection(dimension, option).await
    }

    async fn is_selected(&self, dimension: usize, option: &SkuOption) -> std::result::Result<bool, OracleError> {
        self.inner.is_selected(dimension, option).await
    }

    async fn read_state(&self) -> std::result::Result<OracleState, OracleError> {
        let state = self.inner.read_state().await;
        if self.reads.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
        state
    }

    async fn reset(&self) -> std::result::Result<(), OracleError> {
        self.inner.reset().await
    }
}

#[tokio::test]
async fn test_cancellation_between_combinations() -> anyhow::Result<()> {
    let model = sample_model();
    let token = CancellationToken::new();
    let oracle = CancelAfterReads {
        inner: ScriptedOracle::new(model.clone()),
        token: token.clone(),
        after: 2,
        reads: AtomicUsize::new(0),
    };

    let outcome = TraversalController::new(&oracle, &model, test_options())
        .with_cancellation(token)
        .run()
        .await;

    assert_eq!(outcome.end, TraversalEnd::Cancelled);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[1].combination, combo(&[0, 1]));
    Ok(())
}
