mod support;

use fieldsearch::cache::{CacheKey, CacheState};
use fieldsearch::db::search::Operator;
use fieldsearch::db::DefinitionStore as _;
use fieldsearch::models::{RunTarget, ScalarValue};
use fieldsearch::Error;
use proptest::prelude::*;
use support::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// Walk every page of one of alice's saved searches.
async fn all_pages(
    app: &TestApp,
    definition_id: i64,
    per_page: u32,
) -> anyhow::Result<Vec<Vec<i64>>> {
    let first = app
        .state
        .search
        .execute(&alice(), definition_id, 1, Some(per_page))
        .await?;
    let pages = first.total_count.div_ceil(u64::from(per_page)).max(1) as u32;
    let mut out = vec![first.results.iter().map(|r| r.id).collect()];
    for page in 2..=pages {
        let result = app
            .state
            .search
            .execute(&alice(), definition_id, page, Some(per_page))
            .await?;
        assert_eq!(result.total_count, first.total_count);
        out.push(result.results.iter().map(|r| r.id).collect());
    }
    Ok(out)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pages_partition_the_result(count in 0i64..60, per_page in 1u32..15) {
        let rt = runtime();
        let pages = rt.block_on(async {
            let app = TestApp::new().await?;
            for id in 1..=count {
                let record = order(id, 2, &format!("PO-{id:04}"), "Acme");
                app.records.insert(ORDERS_TABLE, record).await;
            }
            let definition = app
                .state
                .definitions
                .create(&alice(), order_draft("All", vec![]))
                .await?;
            all_pages(&app, definition.id, per_page).await
        }).expect("paging succeeds");

        for page in &pages {
            prop_assert!(page.len() <= per_page as usize);
        }
        let flattened: Vec<i64> = pages.into_iter().flatten().collect();
        prop_assert_eq!(flattened, (1..=count).collect::<Vec<_>>());
    }

    #[test]
    fn decimal_comparisons_match_a_plain_filter(
        costs in prop::collection::vec(prop::option::of(-50i64..50), 1..30),
        threshold in -50i64..50,
    ) {
        let rt = runtime();
        let (greater, not_equal) = rt.block_on(async {
            let app = TestApp::new().await?;
            for (i, cost) in costs.iter().enumerate() {
                let mut record = order(i as i64 + 1, 2, "PO", "Acme");
                if let Some(cost) = cost {
                    record = record.with("total_cost", decimal(&cost.to_string()));
                }
                app.records.insert(ORDERS_TABLE, record).await;
            }

            let mut found = Vec::new();
            for (name, op) in [("gt", Operator::GreaterThan), ("nq", Operator::NotEquals)] {
                let definition = app
                    .state
                    .definitions
                    .create(
                        &alice(),
                        order_draft(name, vec![criterion("ord_cost", op, &threshold.to_string())]),
                    )
                    .await?;
                let page = app
                    .state
                    .search
                    .execute(&alice(), definition.id, 1, Some(500))
                    .await?;
                found.push(page.results.iter().map(|r| r.id).collect::<Vec<_>>());
            }
            Ok::<_, anyhow::Error>((found[0].clone(), found[1].clone()))
        }).expect("searches succeed");

        let expect = |keep: &dyn Fn(Option<i64>) -> bool| -> Vec<i64> {
            costs
                .iter()
                .enumerate()
                .filter(|(_, c)| keep(**c))
                .map(|(i, _)| i as i64 + 1)
                .collect()
        };
        prop_assert_eq!(greater, expect(&|c: Option<i64>| matches!(c, Some(v) if v > threshold)));
        prop_assert_eq!(not_equal, expect(&|c: Option<i64>| c != Some(threshold)));
    }
}

#[tokio::test]
async fn first_page_is_stable_while_the_cache_warms() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;
    let definition = app
        .state
        .definitions
        .create(&alice(), order_draft("Mine", vec![]))
        .await?;

    let first = app.state.search.execute(&alice(), definition.id, 1, Some(2)).await?;
    let key = CacheKey::new(RunTarget::Definition(definition.id), alice().id);
    assert_eq!(app.state.cache.settled(&key).await, CacheState::Warm { ids: 4 });

    let again = app.state.search.execute(&alice(), definition.id, 1, Some(2)).await?;
    assert_eq!(
        first.results.iter().map(|r| r.id).collect::<Vec<_>>(),
        again.results.iter().map(|r| r.id).collect::<Vec<_>>()
    );
    assert_eq!(first.total_count, again.total_count);
    assert_eq!(first.search_run_id, again.search_run_id);

    let second = app.state.search.execute(&alice(), definition.id, 2, Some(2)).await?;
    assert_eq!(second.results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4, 5]);

    let past_end = app.state.search.execute(&alice(), definition.id, 9, Some(2)).await?;
    assert!(past_end.results.is_empty());
    assert_eq!(past_end.total_count, 4);
    Ok(())
}

#[tokio::test]
async fn per_page_is_clamped_and_page_zero_rejected() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;
    let definition = app
        .state
        .definitions
        .create(&alice(), order_draft("Mine", vec![]))
        .await?;

    let page = app
        .state
        .search
        .execute(&alice(), definition.id, 1, Some(10_000))
        .await?;
    assert_eq!(page.per_page, 500);

    let err = app
        .state
        .search
        .execute(&alice(), definition.id, 0, None)
        .await
        .expect_err("pages start at 1");
    assert!(matches!(err, Error::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn cells_follow_column_rank_and_skip_unknown_fields() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let mut draft = order_draft(
        "Labelled",
        vec![criterion("ord_ord_num", Operator::Equals, "PO-1002")],
    );
    draft.columns = vec![
        column("ord_cust_name", 2),
        constant_column("Q1", 0),
        column("ord_ord_num", 1),
        column("ord_retired_field", 3),
    ];
    // Stored directly: the field was removed after the definition was saved.
    let definition = app.definitions.insert(alice().id, false, &draft).await?;

    let page = app.state.search.execute(&alice(), definition.id, 1, None).await?;
    assert_eq!(page.columns, vec!["", "Order Number", "Customer Name"]);
    assert_eq!(
        page.results[0].cells,
        vec![
            Some(ScalarValue::Text("Q1".into())),
            Some(ScalarValue::Text("PO-1002".into())),
            Some(ScalarValue::Text("ACME Industrial".into())),
        ]
    );
    Ok(())
}
