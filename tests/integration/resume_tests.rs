use super::*;
use sku_harvester::export::{read_bundle, write_bundle};
use sku_harvester::models::{Combination, CombinationStatus, Dimension};
use sku_harvester::oracle::ScriptedOracle;
use sku_harvester::{ResultAggregator, TraversalController, TraversalEnd};
use tempfile::tempdir;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_resume_completes_an_aborted_run() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("export.json");
    let model = sample_model();

    // First run loses the surface on the 4th apply and fails (0,1) along the way
    let first_oracle = ScriptedOracle::new(model.clone())
        .unsettled(Combination::new(vec![0, 1]), 10)
        .detach_after(4);
    let outcome = TraversalController::new(&first_oracle, &model, test_options()).run().await;
    assert!(outcome.end.is_aborted());

    let mut first = ResultAggregator::new(model.clone());
    first.absorb(outcome)?;
    write_bundle(&first.finish(), &path)?;
    println!("✓ Wrote partial export");

    // Second run sees different prices, prior ok entries must not change
    let prior = read_bundle(&path)?;
    assert_eq!(prior.summary.ok, 1);
    assert_eq!(prior.summary.failed, 1);
    let first_price = prior.results[0].price;

    let second_oracle = ScriptedOracle::new(model.clone())
        .with_price(Combination::new(vec![0, 0]), Some("¥999.00"));
    let mut aggregator = ResultAggregator::from_export(&prior, &model)?;
    let outcome = TraversalController::new(&second_oracle, &model, test_options())
        .seed_prior(aggregator.prior_ok())?
        .run()
        .await;

    assert_eq!(outcome.end, TraversalEnd::Completed);
    assert_eq!(outcome.stats.resumed, 1);
    assert_eq!(second_oracle.reads().await, 5);

    aggregator.absorb(outcome)?;
    let bundle = aggregator.finish();
    assert_eq!(bundle.summary.ok, 6);
    assert_eq!(bundle.summary.missing, 0);
    assert!(bundle.summary.is_complete());
    assert_eq!(bundle.results[0].price, first_price);
    assert!(bundle.results.iter().all(|r| r.status == CombinationStatus::Ok));
    println!("✓ Resumed run filled the remaining combinations");
    Ok(())
}

#[tokio::test]
async fn test_resume_rejects_different_model() -> anyhow::Result<()> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone());
    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;
    let mut aggregator = ResultAggregator::new(model);
    aggregator.absorb(outcome)?;
    let bundle = aggregator.finish();

    let other = ProductModel::new(vec![Dimension::from_labels("Color", ["Red", "Green"])?])?;
    let result = ResultAggregator::from_export(&bundle, &other);
    let error = assert_err!(result);
    assert!(error.to_string().contains("different variant model"));
    Ok(())
}

#[tokio::test]
async fn test_repeated_absorb_is_idempotent() -> anyhow::Result<()> {
    let model = sample_model();
    let mut aggregator = ResultAggregator::new(model.clone());

    let oracle = ScriptedOracle::new(model.clone());
    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;
    assert_eq!(assert_ok!(aggregator.absorb(outcome)), 6);

    let oracle = ScriptedOracle::new(model.clone());
    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;
    assert_eq!(assert_ok!(aggregator.absorb(outcome)), 0);
    assert_eq!(aggregator.summary().recorded, 6);
    Ok(())
}
