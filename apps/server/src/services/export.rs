//! CSV export of a search definition's full result

use crate::db::search::{ColumnSpec, QueryScope, SecuredQueryBuilder};
use crate::db::{Cell, Datastore, Query};
use crate::fields::FieldRegistry;
use crate::models::{ScalarValue, SearchDefinition, User};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

const HYDRATE_CHUNK: usize = 500;

#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Prefix for record links; links are relative when unset.
    pub link_base_url: Option<String>,
    /// Hard cap on exported rows.
    pub max_rows: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            link_base_url: None,
            max_rows: 250_000,
        }
    }
}

/// A rendered report.
#[derive(Debug, Clone)]
pub struct Export {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
    pub row_count: usize,
    /// More rows matched than the export row limit allows.
    pub truncated: bool,
}

pub struct ReportExporter {
    registry: Arc<FieldRegistry>,
    datastore: Arc<dyn Datastore>,
    settings: ExportSettings,
}

impl ReportExporter {
    pub fn new(
        registry: Arc<FieldRegistry>,
        datastore: Arc<dyn Datastore>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            registry,
            datastore,
            settings,
        }
    }

    /// Run `definition` as `owner` and render every row as CSV. Datetimes are
    /// shown in the owner's timezone.
    pub async fn export_csv(
        &self,
        definition: &SearchDefinition,
        owner: &User,
        now: DateTime<Utc>,
    ) -> Result<Export> {
        let secured = SecuredQueryBuilder::new(&self.registry)
            .build(definition, owner, &QueryScope::unscoped(), now)
            .await?;
        let query = Query::new(self.datastore.clone(), secured);
        let mut ids = query.all_ids(self.settings.max_rows.saturating_add(1)).await?;
        let truncated = ids.len() as u64 > self.settings.max_rows;
        if truncated {
            ids.truncate(self.settings.max_rows as usize);
            tracing::warn!(
                search_definition_id = definition.id,
                user_id = owner.id,
                row_count = ids.len(),
                max_rows = self.settings.max_rows,
                "Export truncated at row limit"
            );
        }

        let tz = owner.tz();
        let module = query.secured().module.clone();
        let columns = &query.secured().columns;

        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header: Vec<&str> = columns.iter().map(ColumnSpec::header).collect();
        if definition.include_links {
            header.push("Link");
        }
        writer.write_record(&header).map_err(csv_error)?;

        let base = self.settings.link_base_url.as_deref().unwrap_or_default();
        let mut row_count = 0;
        for chunk in ids.chunks(HYDRATE_CHUNK) {
            for row in query.hydrate(chunk).await? {
                let mut record: Vec<String> = row
                    .cells
                    .iter()
                    .map(|cell| format_cell(cell, tz, definition.no_time))
                    .collect();
                if definition.include_links {
                    record.push(module.record_link(base, row.id));
                }
                writer.write_record(&record).map_err(csv_error)?;
                row_count += 1;
            }
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Internal(format!("Failed to finish CSV: {e}")))?;

        tracing::info!(
            search_definition_id = definition.id,
            user_id = owner.id,
            rows = row_count,
            bytes = bytes.len(),
            "Exported search results"
        );

        Ok(Export {
            bytes,
            filename: export_filename(&definition.name, now.with_timezone(&tz)),
            content_type: "text/csv",
            row_count,
            truncated,
        })
    }
}

fn csv_error(e: csv::Error) -> Error {
    Error::Internal(format!("Failed to write CSV: {e}"))
}

fn format_cell(cell: &Cell, tz: Tz, no_time: bool) -> String {
    match cell {
        None => String::new(),
        Some(ScalarValue::DateTime(dt)) => {
            let local = dt.with_timezone(&tz);
            if no_time {
                local.format("%Y-%m-%d").to_string()
            } else {
                local.format("%Y-%m-%d %H:%M").to_string()
            }
        }
        Some(value) => value.to_bind_text(),
    }
}

/// `<name>_<yyyymmddhhmm>.csv` with the name reduced to filename-safe characters.
fn export_filename(name: &str, at: DateTime<Tz>) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    while safe.contains("__") {
        safe = safe.replace("__", "_");
    }
    let safe = safe.trim_matches('_');
    let safe = if safe.is_empty() { "search" } else { safe };
    format!("{}_{}.csv", safe, at.format("%Y%m%d%H%M"))
}
