use chrono::{DateTime, NaiveDate, Utc};
use fieldsearch::{db::MemoryRecord, fields::ModuleConfig, models::ScalarValue, models::User};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeSet;
use std::str::FromStr;

pub const MASTER_COMPANY: i64 = 1;
pub const ORDERS_TABLE: &str = "orders";
pub const SHIPMENTS_TABLE: &str = "shipments";

pub fn order_module() -> ModuleConfig {
    serde_json::from_value(json!({
        "id": "order",
        "label": "Order",
        "table": ORDERS_TABLE,
        "company_column": "importer_id",
        "link_path": "/orders/{id}",
        "fields": [
            { "uid": "ord_ord_num", "label": "Order Number", "data_type": "string",
              "column": "order_number", "quick_searchable": true },
            { "uid": "ord_cust_name", "label": "Customer Name", "data_type": "string",
              "column": "customer_name", "quick_searchable": true },
            { "uid": "ord_ord_date", "label": "Order Date", "data_type": "date",
              "column": "order_date" },
            { "uid": "ord_updated_at", "label": "Last Changed", "data_type": "datetime",
              "column": "updated_at" },
            { "uid": "ord_cost", "label": "Total Cost", "data_type": "decimal",
              "column": "total_cost", "permission": "view_costs" },
            { "uid": "ord_closed", "label": "Closed", "data_type": "boolean",
              "column": "closed" },
            { "uid": "ord_internal_note", "label": "Internal Note", "data_type": "string",
              "column": "internal_note", "admin_only": true }
        ]
    }))
    .expect("order module config")
}

pub fn shipment_module() -> ModuleConfig {
    serde_json::from_value(json!({
        "id": "shipment",
        "label": "Shipment",
        "table": SHIPMENTS_TABLE,
        "company_column": "importer_id",
        "requires_criterion": true,
        "fields": [
            { "uid": "shp_ref", "label": "Reference", "data_type": "string",
              "column": "reference", "quick_searchable": true },
            { "uid": "shp_eta", "label": "ETA", "data_type": "date", "column": "eta" }
        ]
    }))
    .expect("shipment module config")
}

pub fn user(id: i64, company_id: i64, username: &str) -> User {
    User {
        id,
        company_id,
        username: username.to_string(),
        full_name: String::new(),
        email: format!("{username}@example.com"),
        time_zone: "UTC".to_string(),
        admin: false,
        sys_admin: false,
        system: false,
        permissions: BTreeSet::new(),
    }
}

/// Sees every company's rows.
pub fn master() -> User {
    User {
        full_name: "Morgan Master".to_string(),
        ..user(1, MASTER_COMPANY, "master")
    }
}

/// New York based, may see costs.
pub fn alice() -> User {
    User {
        full_name: "Alice Archer".to_string(),
        time_zone: "America/New_York".to_string(),
        permissions: BTreeSet::from(["view_costs".to_string()]),
        ..user(10, 2, "alice")
    }
}

/// Same company as alice, no cost permission.
pub fn bob() -> User {
    User {
        full_name: "Bob Baker".to_string(),
        ..user(11, 2, "bob")
    }
}

pub fn carol() -> User {
    User {
        full_name: "Carol Cole".to_string(),
        ..user(12, 3, "carol")
    }
}

pub fn admin() -> User {
    User {
        admin: true,
        ..user(13, 3, "admin")
    }
}

pub fn order(id: i64, company_id: i64, number: &str, customer: &str) -> MemoryRecord {
    MemoryRecord::new(id)
        .with("importer_id", ScalarValue::Integer(company_id))
        .with("order_number", ScalarValue::Text(number.to_string()))
        .with("customer_name", ScalarValue::Text(customer.to_string()))
}

pub fn date(s: &str) -> ScalarValue {
    ScalarValue::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date"))
}

pub fn datetime(s: &str) -> ScalarValue {
    ScalarValue::DateTime(
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC 3339 timestamp")
            .with_timezone(&Utc),
    )
}

pub fn decimal(s: &str) -> ScalarValue {
    ScalarValue::Decimal(Decimal::from_str(s).expect("valid decimal"))
}

/// Orders 1, 2, 4 and 5 belong to company 2 (alice, bob); order 3 to company 3.
pub fn standard_orders() -> Vec<MemoryRecord> {
    vec![
        order(1, 2, "PO-1001", "Acme Corp")
            .with("order_date", date("2024-01-10"))
            .with("updated_at", datetime("2024-01-01T04:59:00Z"))
            .with("total_cost", decimal("120.50"))
            .with("closed", ScalarValue::Boolean(false)),
        order(2, 2, "PO-1002", "ACME Industrial")
            .with("order_date", date("2024-02-05"))
            .with("updated_at", datetime("2024-01-01T05:01:00Z"))
            .with("total_cost", decimal("80"))
            .with("closed", ScalarValue::Boolean(true)),
        order(3, 3, "PO-2001", "Acme Holdings")
            .with("order_date", date("2024-01-20"))
            .with("updated_at", datetime("2024-01-03T12:00:00Z"))
            .with("closed", ScalarValue::Boolean(false)),
        order(4, 2, "PO-1003", "Globex")
            .with("order_date", date("2024-03-01"))
            .with("updated_at", datetime("2024-01-02T00:00:00Z")),
        order(5, 2, "SO-1004", "Initech")
            .with("internal_note", ScalarValue::Text("rush".to_string())),
    ]
}
