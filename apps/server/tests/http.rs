mod support;

use axum::http::{header, Method, StatusCode};
use fieldsearch::db::DefinitionStore as _;
use fieldsearch::models::Destination;
use serde_json::json;
use support::*;

fn acme_search(name: &str) -> serde_json::Value {
    json!({
        "module": "order",
        "name": name,
        "criteria": [
            { "field_uid": "ord_cust_name", "operator": "co", "value": "acme" }
        ],
        "sort_keys": [
            { "field_uid": "ord_ord_num", "descending": true }
        ],
        "columns": [
            { "field_uid": "ord_ord_num", "rank": 0 },
            { "constant": "Imported", "rank": 1 }
        ]
    })
}

#[tokio::test]
async fn health_needs_no_user() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    let (status, headers, body) = app.request_as(None, Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(body["status"], "ok");
    assert!(headers.contains_key("x-request-id"));
    Ok(())
}

#[tokio::test]
async fn requests_without_a_user_are_rejected() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    let (status, _, body) = app
        .request_as(None, Method::GET, "/search-definitions", None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(body["error"]["code"], "unauthorized");
    Ok(())
}

#[tokio::test]
async fn modules_and_fields_reflect_visibility() -> anyhow::Result<()> {
    let app = TestApp::new().await?;

    let (status, modules) = app.json_as(&bob(), Method::GET, "/modules", None).await?;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = modules
        .as_array()
        .expect("module list")
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["order", "shipment"]);

    let uids = |fields: &serde_json::Value| -> Vec<String> {
        fields
            .as_array()
            .expect("field list")
            .iter()
            .filter_map(|f| f["uid"].as_str().map(str::to_string))
            .collect()
    };

    let (_, bobs) = app
        .json_as(&bob(), Method::GET, "/modules/order/fields", None)
        .await?;
    let bobs = uids(&bobs);
    assert!(bobs.contains(&"ord_ord_num".to_string()));
    assert!(!bobs.contains(&"ord_cost".to_string()));
    assert!(!bobs.contains(&"ord_internal_note".to_string()));

    let (_, alices) = app
        .json_as(&alice(), Method::GET, "/modules/order/fields", None)
        .await?;
    assert!(uids(&alices).contains(&"ord_cost".to_string()));

    let (status, _) = app
        .json_as(&bob(), Method::GET, "/modules/invoice/fields", None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn definition_lifecycle_over_http() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let (status, created) = app
        .json_as(&alice(), Method::POST, "/search-definitions", Some(acme_search("Acme")))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let id = created["id"].as_i64().expect("id");
    assert_eq!(created["user_id"], alice().id);

    let (status, body) = app
        .json_as(&alice(), Method::POST, "/search-definitions", Some(acme_search("ACME")))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, fetched) = app
        .json_as(&alice(), Method::GET, &format!("/search-definitions/{id}"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Acme");
    assert_eq!(fetched["criteria_summary"][0], "Customer Name Contains acme");

    let (status, _) = app
        .json_as(&bob(), Method::GET, &format!("/search-definitions/{id}"), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, page) = app
        .json_as(
            &alice(),
            Method::GET,
            &format!("/search-definitions/{id}/results?per_page=1"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_count"], 2);
    assert_eq!(page["columns"], json!(["Order Number", ""]));
    assert_eq!(page["results"][0]["id"], 2);
    assert_eq!(page["results"][0]["cells"], json!(["PO-1002", "Imported"]));

    let (status, list) = app
        .json_as(&alice(), Method::GET, "/search-definitions?module=order", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    let (status, _) = app
        .json_as(&alice(), Method::DELETE, &format!("/search-definitions/{id}"), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .json_as(&alice(), Method::GET, &format!("/search-definitions/{id}"), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn compile_errors_are_unprocessable_and_name_the_field() -> anyhow::Result<()> {
    let app = TestApp::new().await?;

    let (status, body) = app
        .json_as(
            &bob(),
            Method::POST,
            "/search-definitions",
            Some(json!({
                "module": "order",
                "name": "Costs",
                "criteria": [{ "field_uid": "ord_cost", "operator": "gt", "value": "10" }]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "forbidden_field");
    assert_eq!(body["error"]["field_uid"], "ord_cost");

    let (status, body) = app
        .json_as(
            &alice(),
            Method::POST,
            "/search-definitions",
            Some(json!({
                "module": "order",
                "name": "Closed",
                "criteria": [{ "field_uid": "ord_closed", "operator": "co", "value": "t" }]
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "invalid_operator");
    Ok(())
}

#[tokio::test]
async fn copy_give_and_child_deletes() -> anyhow::Result<()> {
    let app = TestApp::new().await?;

    let (_, created) = app
        .json_as(&alice(), Method::POST, "/search-definitions", Some(acme_search("Acme")))
        .await?;
    let id = created["id"].as_i64().expect("id");

    let (status, copy) = app
        .json_as(
            &alice(),
            Method::POST,
            &format!("/search-definitions/{id}/copy"),
            Some(json!({ "name": "Acme again" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(copy["name"], "Acme again");
    assert_ne!(copy["id"], created["id"]);

    let (status, given) = app
        .json_as(
            &alice(),
            Method::POST,
            &format!("/search-definitions/{id}/give"),
            Some(json!({ "user_id": bob().id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(given["name"], "Acme (From Alice Archer)");
    assert_eq!(given["user_id"], bob().id);

    let (status, _) = app
        .json_as(
            &alice(),
            Method::POST,
            &format!("/search-definitions/{id}/give"),
            Some(json!({ "user_id": carol().id })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "carol is in another company");

    let sort_id = created["sort_keys"][0]["id"].as_i64().expect("sort id");
    let (status, _) = app
        .json_as(
            &alice(),
            Method::DELETE,
            &format!("/search-definitions/{id}/sorts/{sort_id}"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .json_as(
            &alice(),
            Method::DELETE,
            &format!("/search-definitions/{id}/sorts/{sort_id}"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .json_as(
            &alice(),
            Method::DELETE,
            &format!("/search-definitions/{id}/widgets/1"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, fetched) = app
        .json_as(&alice(), Method::GET, &format!("/search-definitions/{id}"), None)
        .await?;
    assert_eq!(fetched["sort_keys"], json!([]));
    Ok(())
}

#[tokio::test]
async fn transfer_passwords_never_leave_the_service() -> anyhow::Result<()> {
    let app = TestApp::new().await?;

    let mut draft = acme_search("Nightly drop");
    draft["schedules"] = json!([{
        "destination": {
            "mode": "file_transfer",
            "protocol": "sftp",
            "host": "files.example.com",
            "username": "drop",
            "password": "s3cret",
            "remote_folder": "/inbound"
        },
        "run_monday": true,
        "run_hour": 2
    }]);

    let (status, created) = app
        .json_as(&alice(), Method::POST, "/search-definitions", Some(draft))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["schedules"][0]["destination"]["password"], "");
    let id = created["id"].as_i64().expect("id");

    // Send back what the client saw; the stored password survives.
    let (status, updated) = app
        .json_as(
            &alice(),
            Method::PUT,
            &format!("/search-definitions/{id}"),
            Some(created.clone()),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["schedules"][0]["destination"]["password"], "");

    let stored = app.definitions.get(id).await?.expect("definition");
    match &stored.schedules[0].destination {
        Destination::FileTransfer(target) => assert_eq!(target.password, "s3cret"),
        other => panic!("unexpected destination {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn export_returns_csv_with_links() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let mut draft = acme_search("Acme export");
    draft["include_links"] = json!(true);
    let (_, created) = app
        .json_as(&alice(), Method::POST, "/search-definitions", Some(draft))
        .await?;
    let id = created["id"].as_i64().expect("id");

    let (status, headers, body) = app
        .request_as(
            Some(&alice()),
            Method::GET,
            &format!("/search-definitions/{id}/export"),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str()?;
    assert!(disposition.starts_with("attachment; filename=\"Acme_export_"));
    assert_eq!(
        String::from_utf8(body.to_vec())?,
        "Order Number,,Link\nPO-1002,Imported,/orders/2\nPO-1001,Imported,/orders/1\n"
    );
    Ok(())
}

#[tokio::test]
async fn exports_stop_at_the_row_limit() -> anyhow::Result<()> {
    let app = TestApp::new_with_config(|config| config.schedules.max_export_rows = 1).await?;
    app.seed_orders().await;

    let (_, created) = app
        .json_as(
            &alice(),
            Method::POST,
            "/search-definitions",
            Some(acme_search("Capped")),
        )
        .await?;
    let id = created["id"].as_i64().expect("id");
    let definition = app.definitions.get(id).await?.expect("definition");

    let export = app
        .state
        .exporter
        .export_csv(&definition, &alice(), chrono::Utc::now())
        .await?;
    assert!(export.truncated);
    assert_eq!(export.row_count, 1);
    assert_eq!(
        String::from_utf8(export.bytes)?,
        "Order Number,\nPO-1002,Imported\n"
    );
    Ok(())
}

#[tokio::test]
async fn quick_search_over_http() -> anyhow::Result<()> {
    let app = TestApp::new().await?;
    app.seed_orders().await;

    let (status, page) = app
        .json_as(&carol(), Method::GET, "/modules/order/search?q=acme", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_count"], 1);
    assert_eq!(page["results"][0]["id"], 3);

    let (status, _) = app
        .json_as(&carol(), Method::GET, "/modules/order/search?q=", None)
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}
