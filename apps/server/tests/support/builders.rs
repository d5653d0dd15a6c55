use chrono::Weekday;
use fieldsearch::db::search::Operator;
use fieldsearch::models::{
    Column, ColumnSource, Criterion, Destination, ModuleId, Schedule, SearchDefinitionDraft,
    SortKey,
};

pub fn criterion(field_uid: &str, operator: Operator, value: &str) -> Criterion {
    Criterion {
        id: 0,
        field_uid: field_uid.to_string(),
        operator,
        value: value.to_string(),
        secondary_value: None,
        include_empty: false,
        rank: 0,
    }
}

pub fn column(field_uid: &str, rank: i32) -> Column {
    Column {
        id: 0,
        source: ColumnSource::FieldUid(field_uid.to_string()),
        rank,
    }
}

pub fn constant_column(text: &str, rank: i32) -> Column {
    Column {
        id: 0,
        source: ColumnSource::Constant(text.to_string()),
        rank,
    }
}

pub fn sort(field_uid: &str, rank: i32, descending: bool) -> SortKey {
    SortKey {
        id: 0,
        field_uid: field_uid.to_string(),
        rank,
        descending,
    }
}

/// An order search showing number and customer.
pub fn order_draft(name: &str, criteria: Vec<Criterion>) -> SearchDefinitionDraft {
    let criteria = criteria
        .into_iter()
        .enumerate()
        .map(|(i, c)| Criterion { rank: i as i32, ..c })
        .collect();
    SearchDefinitionDraft {
        module: ModuleId::new("order"),
        name: name.to_string(),
        criteria,
        columns: vec![column("ord_ord_num", 0), column("ord_cust_name", 1)],
        ..Default::default()
    }
}

pub fn email_schedule(recipients: &[&str], run_hour: u8, days: &[Weekday]) -> Schedule {
    let mut schedule = Schedule::new(
        Destination::Email {
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: None,
            body: None,
        },
        run_hour,
    );
    for day in days {
        schedule.set_day(*day, true);
    }
    schedule
}

pub const EVERY_DAY: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];
