//! Batch import of customer messages from CSV exports.
//!
//! Headers are sniffed to find the name/email/phone/content/customer-id
//! columns. Each row goes through `MessageService::import_incoming`, so
//! re-running an import does not duplicate messages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use csv::StringRecord;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ImportError;
use crate::support::MessageService;
use crate::support::model::{CustomerInfo, IncomingOutcome};

/// Which field of the customer message a column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Name,
    Email,
    Phone,
    Content,
    CustomerId,
}

impl Role {
    /// Sniffing order; the first role a header matches wins.
    const ORDER: [Role; 5] = [
        Self::Name,
        Self::Email,
        Self::Phone,
        Self::Content,
        Self::CustomerId,
    ];

    fn matches(self, header: &str) -> bool {
        match self {
            Self::Name => header.contains("name"),
            Self::Email => header.contains("email"),
            Self::Phone => header.contains("phone") || header.contains("mobile"),
            Self::Content => {
                header.contains("message") || header.contains("content") || header.contains("text")
            }
            Self::CustomerId => header.contains("customer") && header.contains("id"),
        }
    }
}

/// Column index per role, as detected from a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub name: Option<usize>,
    pub email: Option<usize>,
    pub phone: Option<usize>,
    pub content: Option<usize>,
    pub customer_id: Option<usize>,
}

impl ColumnMap {
    /// Assign each header to the first unclaimed role it matches.
    pub fn sniff(headers: &StringRecord) -> Self {
        let mut map = Self::default();
        for (idx, header) in headers.iter().enumerate() {
            let header = header.to_lowercase();
            for role in Role::ORDER {
                let slot = map.slot(role);
                if slot.is_none() && role.matches(&header) {
                    *slot = Some(idx);
                    break;
                }
            }
        }
        map
    }

    fn slot(&mut self, role: Role) -> &mut Option<usize> {
        match role {
            Role::Name => &mut self.name,
            Role::Email => &mut self.email,
            Role::Phone => &mut self.phone,
            Role::Content => &mut self.content,
            Role::CustomerId => &mut self.customer_id,
        }
    }

    fn is_assigned(&self, idx: usize) -> bool {
        [self.name, self.email, self.phone, self.content, self.customer_id].contains(&Some(idx))
    }

    /// Without a content header, use the first free column holding text.
    fn fill_content(&mut self, width: usize, records: &[StringRecord]) {
        if self.content.is_some() {
            return;
        }
        self.content = (0..width)
            .filter(|&idx| !self.is_assigned(idx))
            .find(|&idx| is_text_column(records, idx));
    }
}

/// True if the column has at least one non-empty value and not all of them are numbers.
fn is_text_column(records: &[StringRecord], idx: usize) -> bool {
    let mut values = records
        .iter()
        .filter_map(|r| r.get(idx))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .peekable();
    values.peek().is_some() && values.any(|v| v.parse::<f64>().is_err())
}

fn cell(record: &StringRecord, idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Per-file import counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileReport {
    pub file: String,
    pub rows: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Set when the file could not be processed at all.
    pub error: Option<String>,
}

/// Outcome of an import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub files: Vec<FileReport>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.files.iter().map(|f| f.imported).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.files.iter().map(|f| f.duplicates).sum()
    }

    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }
}

pub struct Importer {
    service: Arc<MessageService>,
    filter: String,
}

impl Importer {
    pub fn new(service: Arc<MessageService>, filter: impl Into<String>) -> Self {
        Self {
            service,
            filter: filter.into(),
        }
    }

    /// `*.csv` files in `dir` whose name contains the filter, sorted.
    pub fn candidate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ImportError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_csv = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if is_csv && name.contains(&self.filter) && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Import every candidate file. A failing file is recorded and the run continues.
    pub async fn run(&self, dir: &Path) -> Result<ImportReport, ImportError> {
        let files = self.candidate_files(dir)?;
        info!(count = files.len(), dir = %dir.display(), "Found files to import");

        let mut report = ImportReport::default();
        for path in files {
            let file = display_name(&path);
            match self.import_file(&path).await {
                Ok(file_report) => {
                    info!(
                        file = %file_report.file,
                        imported = file_report.imported,
                        duplicates = file_report.duplicates,
                        skipped = file_report.skipped,
                        failed = file_report.failed,
                        "File imported"
                    );
                    report.files.push(file_report);
                }
                Err(e) => {
                    warn!(file = %file, error = %e, "Failed to import file");
                    report.files.push(FileReport {
                        file,
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
        }
        Ok(report)
    }

    /// Import one CSV file.
    pub async fn import_file(&self, path: &Path) -> Result<FileReport, ImportError> {
        let file = display_name(path);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(path)?;
        let headers = reader.headers()?.clone();

        let mut records = Vec::new();
        let mut unreadable = 0usize;
        for (idx, record) in reader.records().enumerate() {
            match record {
                Ok(record) => records.push((idx, record)),
                Err(e) => {
                    warn!(file = %file, row = idx, error = %e, "Unreadable row");
                    unreadable += 1;
                }
            }
        }

        let mut columns = ColumnMap::sniff(&headers);
        let parsed: Vec<StringRecord> = records.iter().map(|(_, r)| r.clone()).collect();
        columns.fill_content(headers.len(), &parsed);
        if columns.content.is_none() {
            return Err(ImportError::NoContentColumn { file });
        }
        info!(file = %file, rows = records.len() + unreadable, ?columns, "Using columns");

        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let mut report = FileReport {
            file: file.clone(),
            rows: records.len() + unreadable,
            failed: unreadable,
            ..Default::default()
        };

        for (idx, record) in &records {
            let Some(content) = cell(record, columns.content)
                .filter(|c| !c.eq_ignore_ascii_case("nan"))
            else {
                report.skipped += 1;
                continue;
            };

            let customer = CustomerInfo {
                customer_id: cell(record, columns.customer_id).map(str::to_string),
                name: Some(
                    cell(record, columns.name)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Customer {}", idx + 1)),
                ),
                email: Some(
                    cell(record, columns.email)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("customer{}@example.com", idx + 1)),
                ),
                phone: cell(record, columns.phone).map(str::to_string),
                profile: Some(serde_json::json!({
                    "import_source": file,
                    "import_row": idx,
                })),
            };

            let generated_id = format!("CUST_IMPORT_{stamp}_{idx}");
            match self
                .service
                .import_incoming(customer, content, Some(generated_id))
                .await
            {
                Ok(IncomingOutcome::Created { .. }) => report.imported += 1,
                Ok(IncomingOutcome::Duplicate { .. }) => report.duplicates += 1,
                Err(e) => {
                    warn!(file = %file, row = idx, error = %e, "Failed to import row");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
