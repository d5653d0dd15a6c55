mod support;

use fieldsearch::db::search::Operator;
use fieldsearch::db::DefinitionStore as _;
use fieldsearch::models::{ModuleId, SearchDefinitionDraft};
use fieldsearch::{CompileError, Error};
use support::*;

fn ids(page: &fieldsearch::services::SearchPage) -> Vec<i64> {
    page.results.iter().map(|r| r.id).collect()
}

#[tokio::test]
async fn contains_ignores_case_and_stays_inside_the_company() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let draft = order_draft(
        "Acme orders",
        vec![criterion("ord_cust_name", Operator::Contains, "acme")],
    );
    let mine = app.state.definitions.create(&alice(), draft.clone()).await?;
    let page = app.state.search.execute(&alice(), mine.id, 1, None).await?;
    assert_eq!(ids(&page), vec![1, 2]);
    assert_eq!(page.total_count, 2);
    assert_eq!(page.columns, vec!["Order Number", "Customer Name"]);

    let theirs = app.state.definitions.create(&carol(), draft.clone()).await?;
    let page = app.state.search.execute(&carol(), theirs.id, 1, None).await?;
    assert_eq!(ids(&page), vec![3]);

    let all = app.state.definitions.create(&master(), draft).await?;
    let page = app.state.search.execute(&master(), all.id, 1, None).await?;
    assert_eq!(ids(&page), vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn datetime_comparisons_use_the_owner_timezone() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    // 00:00 in New York is 05:00Z; "after" starts at the end of that minute.
    let draft = order_draft(
        "Changed this year",
        vec![criterion("ord_updated_at", Operator::GreaterThan, "2024-01-01 00:00")],
    );

    let ny = app.state.definitions.create(&alice(), draft.clone()).await?;
    let page = app.state.search.execute(&alice(), ny.id, 1, None).await?;
    assert_eq!(ids(&page), vec![2, 4]);

    let utc = app.state.definitions.create(&bob(), draft).await?;
    let page = app.state.search.execute(&bob(), utc.id, 1, None).await?;
    assert_eq!(ids(&page), vec![1, 2, 4]);
    Ok(())
}

#[tokio::test]
async fn negated_operators_match_blank_values() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let closed_false = app
        .state
        .definitions
        .create(
            &alice(),
            order_draft(
                "Not closed",
                vec![criterion("ord_closed", Operator::Equals, "false")],
            ),
        )
        .await?;
    let page = app.state.search.execute(&alice(), closed_false.id, 1, None).await?;
    // Orders 4 and 5 have no closed flag.
    assert_eq!(ids(&page), vec![1, 4, 5]);

    let not_acme = app
        .state
        .definitions
        .create(
            &alice(),
            order_draft(
                "No date or not January",
                vec![criterion("ord_ord_date", Operator::NotEquals, "2024-01-10")],
            ),
        )
        .await?;
    let page = app.state.search.execute(&alice(), not_acme.id, 1, None).await?;
    assert_eq!(ids(&page), vec![2, 4, 5]);
    Ok(())
}

#[tokio::test]
async fn in_list_takes_one_value_per_line() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let definition = app
        .state
        .definitions
        .create(
            &alice(),
            order_draft(
                "Picked orders",
                vec![criterion(
                    "ord_ord_num",
                    Operator::InList,
                    "po-1001\nSO-1004\n\nPO-2001",
                )],
            ),
        )
        .await?;
    let page = app.state.search.execute(&alice(), definition.id, 1, None).await?;
    // PO-2001 belongs to another company.
    assert_eq!(ids(&page), vec![1, 5]);
    Ok(())
}

#[tokio::test]
async fn between_uses_the_secondary_value() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let mut ranged = criterion("ord_ord_date", Operator::Between, "2024-01-01");
    ranged.secondary_value = Some("2024-02-29".to_string());
    let definition = app
        .state
        .definitions
        .create(&alice(), order_draft("Q1 so far", vec![ranged]))
        .await?;
    let page = app.state.search.execute(&alice(), definition.id, 1, None).await?;
    assert_eq!(ids(&page), vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn sort_keys_apply_in_rank_order() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let mut draft = order_draft(
        "Newest first",
        vec![criterion("ord_ord_num", Operator::StartsWith, "PO")],
    );
    draft.sort_keys = vec![sort("ord_ord_date", 0, true)];
    let definition = app.state.definitions.create(&alice(), draft).await?;
    let page = app.state.search.execute(&alice(), definition.id, 1, None).await?;
    assert_eq!(ids(&page), vec![4, 2, 1]);
    Ok(())
}

#[tokio::test]
async fn fields_the_user_cannot_see_are_rejected() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let costly = order_draft(
        "Expensive",
        vec![criterion("ord_cost", Operator::GreaterThan, "100")],
    );
    let err = app
        .state
        .definitions
        .create(&bob(), costly.clone())
        .await
        .expect_err("bob lacks view_costs");
    assert!(matches!(
        err,
        Error::Compile(CompileError::ForbiddenField { ref uid }) if uid == "ord_cost"
    ));

    // Alice cannot hand bob a search he could not have written.
    let original = app.state.definitions.create(&alice(), costly.clone()).await?;
    let page = app.state.search.execute(&alice(), original.id, 1, None).await?;
    assert_eq!(ids(&page), vec![1]);

    let err = app
        .state
        .definitions
        .give_to(&alice(), original.id, bob().id)
        .await
        .expect_err("copy would not compile for bob");
    assert!(matches!(
        err,
        Error::Compile(CompileError::ForbiddenField { ref uid }) if uid == "ord_cost"
    ));
    assert!(app.state.definitions.list(&bob(), None).await?.is_empty());

    // A stored definition still refuses to run once the field is hidden.
    let stale = app.definitions.insert(bob().id, false, &costly).await?;
    let err = app
        .state
        .search
        .execute(&bob(), stale.id, 1, None)
        .await
        .expect_err("field is hidden from bob");
    assert!(matches!(
        err,
        Error::Compile(CompileError::ForbiddenField { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn admin_only_columns_are_forbidden_to_others() -> anyhow::Result<()> {
    let app = TestApp::new().await?;

    let mut draft = order_draft("Notes", vec![criterion("ord_ord_num", Operator::IsNotBlank, "")]);
    draft.columns.push(column("ord_internal_note", 2));

    let err = app
        .state
        .definitions
        .create(&bob(), draft.clone())
        .await
        .expect_err("note is admin only");
    assert_eq!(
        err.to_string(),
        Error::from(CompileError::ForbiddenField {
            uid: "ord_internal_note".into()
        })
        .to_string()
    );

    app.state.definitions.create(&admin(), draft).await?;
    Ok(())
}

#[tokio::test]
async fn invalid_values_name_the_field() -> anyhow::Result<()> {
    let app = TestApp::new().await?;

    let err = app
        .state
        .definitions
        .create(
            &alice(),
            order_draft(
                "Bad date",
                vec![criterion("ord_ord_date", Operator::GreaterThan, "yesterday-ish")],
            ),
        )
        .await
        .expect_err("not a date");
    match err {
        Error::Compile(e) => {
            assert_eq!(e.code(), "invalid_value");
            assert_eq!(e.field_uid(), Some("ord_ord_date"));
        }
        other => panic!("expected compile error, got {other:?}"),
    }

    let err = app
        .state
        .definitions
        .create(
            &alice(),
            order_draft(
                "No such field",
                vec![criterion("ord_missing", Operator::Equals, "x")],
            ),
        )
        .await
        .expect_err("unknown field");
    assert!(matches!(
        err,
        Error::Compile(CompileError::UnknownField { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn modules_that_require_a_criterion_refuse_empty_searches() -> anyhow::Result<()> {
    let app = TestApp::new().await?;

    let definition = app
        .state
        .definitions
        .create(
            &alice(),
            SearchDefinitionDraft {
                module: ModuleId::new("shipment"),
                name: "Everything".to_string(),
                ..Default::default()
            },
        )
        .await?;

    let err = app
        .state
        .search
        .execute(&alice(), definition.id, 1, None)
        .await
        .expect_err("shipments need a criterion");
    assert!(matches!(
        err,
        Error::Compile(CompileError::MissingCriterion { ref module }) if module == "shipment"
    ));

    // Orders do not.
    app.seed_orders().await;
    let open = app
        .state
        .definitions
        .create(&alice(), order_draft("All orders", vec![]))
        .await?;
    let page = app.state.search.execute(&alice(), open.id, 1, None).await?;
    assert_eq!(page.total_count, 4);
    Ok(())
}
