use super::*;
use sku_harvester::models::Combination;
use sku_harvester::oracle::ScriptedOracle;
use sku_harvester::replay::{replay, ReplayOptions, ReplayPlan};
use sku_harvester::{ExportBundle, ResultAggregator, TraversalController};

async fn harvested_bundle() -> anyhow::Result<ExportBundle> {
    let model = sample_model();
    let oracle = ScriptedOracle::new(model.clone())
        .with_price(Combination::new(vec![0, 1]), Some("询价"))
        .mark_unavailable(Combination::new(vec![1, 2]));
    let outcome = TraversalController::new(&oracle, &model, test_options()).run().await;

    let mut aggregator = ResultAggregator::new(model);
    aggregator.absorb(outcome)?;
    Ok(aggregator.finish())
}

#[tokio::test]
async fn test_replay_into_empty_editor() -> anyhow::Result<()> {
    let bundle = harvested_bundle().await?;
    let plan = ReplayPlan::from_bundle(&bundle);
    let editor = InMemoryEditor::new();

    let report = replay(&editor, &plan, ReplayOptions::default()).await?;

    assert_eq!(report.dimensions_created, 2);
    assert_eq!(report.options_added, 5);
    assert_eq!(report.prices_written, 4);
    assert_eq!(report.prices_skipped, 2);

    let state = editor.snapshot().await;
    assert_eq!(state.dimensions[0].0, "Color");
    assert_eq!(state.dimensions[1].1, vec!["S", "M", "L"]);
    assert_eq!(state.prices.get(&0), Some(&dec("100.00")));
    assert_eq!(state.prices.get(&1), None);
    assert_eq!(state.prices.get(&4), Some(&dec("104.00")));
    assert_eq!(state.prices.get(&5), None);
    assert_eq!(state.saves, 1);
    println!("✓ Replayed {} prices", report.prices_written);
    Ok(())
}

#[tokio::test]
async fn test_replay_respects_existing_entries() -> anyhow::Result<()> {
    let bundle = harvested_bundle().await?;
    let plan = ReplayPlan::from_bundle(&bundle);
    let editor = InMemoryEditor::new()
        .with_dimension("Color", &["Red"])
        .with_price(0, dec("88.00"))
        .with_price(2, Decimal::ZERO);

    let report = replay(&editor, &plan, ReplayOptions::default()).await?;

    assert_eq!(report.dimensions_existing, 1);
    assert_eq!(report.dimensions_created, 1);
    assert_eq!(report.options_existing, 1);
    assert_eq!(report.options_added, 4);
    assert_eq!(report.prices_already_set, 1);

    let state = editor.snapshot().await;
    assert_eq!(state.dimensions[0].1, vec!["Red", "Blue"]);
    assert_eq!(state.prices.get(&0), Some(&dec("88.00")));
    // A zero price counts as empty
    assert_eq!(state.prices.get(&2), Some(&dec("102.00")));
    Ok(())
}

#[tokio::test]
async fn test_second_replay_changes_nothing() -> anyhow::Result<()> {
    let bundle = harvested_bundle().await?;
    let plan = ReplayPlan::from_bundle(&bundle);
    let editor = InMemoryEditor::new();

    replay(&editor, &plan, ReplayOptions::default()).await?;
    let before = editor.snapshot().await;
    let report = replay(&editor, &plan, ReplayOptions::default()).await?;
    let after = editor.snapshot().await;

    assert_eq!(report.dimensions_created, 0);
    assert_eq!(report.options_added, 0);
    assert_eq!(report.prices_written, 0);
    assert_eq!(report.prices_already_set, 4);
    assert_eq!(before.prices, after.prices);
    assert_eq!(before.dimensions, after.dimensions);
    Ok(())
}

#[tokio::test]
async fn test_min_price_threshold() -> anyhow::Result<()> {
    let bundle = harvested_bundle().await?;
    let plan = ReplayPlan::from_bundle(&bundle);
    let editor = InMemoryEditor::new();

    let options = ReplayOptions {
        min_price: dec("103.00"),
    };
    let report = replay(&editor, &plan, options).await?;

    // 103 and 104 pass; 100 and 102 are below; (0,1) and (1,2) have no price
    assert_eq!(report.prices_written, 2);
    assert_eq!(report.prices_skipped, 4);
    Ok(())
}
