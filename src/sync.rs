//! Spreadsheet sync: fetch the delimited export of the question sheet, map
//! its header row onto question fields, coerce every cell by field type and
//! replace the local store with the valid rows.
//!
//! Wire format: rows are separated by U+001F, cells by U+001E. The first row
//! holds the column headers. Free-text cells carry newlines as a literal
//! backslash followed by `n`.

use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::model::{NOT_APPLICABLE, Question, is_valid_value, now_iso, split_tags};
use crate::store::QuestionStore;

pub const ROW_SEPARATOR: char = '\u{1f}';
pub const FIELD_SEPARATOR: char = '\u{1e}';

/// Prefix of an in-band failure message from the sheet endpoint.
const REMOTE_ERROR_PREFIX: &str = "Error:";

lazy_static! {
    static ref LEADING_FLOAT_REGEX: Regex =
        Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").unwrap();

    /// Sheet column header → question field. Headers are matched verbatim.
    /// The Chinese headers appear twice: in the legacy mis-decoded form older
    /// endpoint deployments emit, and as typed in the sheet.
    static ref HEADER_FIELDS: HashMap<&'static str, Field> = {
        let mut m = HashMap::new();
        m.insert("Publisher", Field::Publisher);
        m.insert("Exam", Field::Examination);
        m.insert("Year", Field::Year);
        m.insert("Paper", Field::Paper);
        m.insert("Section", Field::Section);
        m.insert("Question Number", Field::QuestionNumber);
        m.insert("Unique ID", Field::Id);
        m.insert("Plain text (Chi)", Field::QuestionTextChi);
        m.insert("Plain text (Eng)", Field::QuestionTextEng);
        m.insert(
            "\u{e5}\u{a4}\u{161}\u{e9}\u{b8}\u{e9}\u{a1}",
            Field::MultipleSelectionType,
        );
        m.insert("Graph", Field::GraphType);
        m.insert("Table", Field::TableType);
        m.insert("Answer", Field::Answer);
        m.insert(
            "\u{e7}\u{ad}\u{201d}\u{e5}\u{b0}\u{e7}\u{2122}\u{be}\u{e5}\u{2c6}\u{2020}\u{e6}\u{af}\u{201d} (%)",
            Field::CorrectPercentage,
        );
        m.insert(
            "\u{e8}\u{20ac}\u{192}\u{e8}\u{a9}\u{a6}\u{e5}\u{a0}\u{b1}\u{e5}\u{2018}\u{160}",
            Field::MarkersReport,
        );
        m.insert("Marks", Field::Marks);
        m.insert(
            "\u{e8}\u{aa}\u{b2}\u{e7}\u{a8}\u{2039}\u{e5}\u{2c6}\u{2020}\u{e9}\u{a1}",
            Field::CurriculumClassification,
        );
        m.insert(
            "Aristo Learning Focus\u{e5}\u{2c6}\u{2020}\u{e9}\u{a1} (\u{e4}\u{bb}\u{a5}\u{e4}\u{b8}\u{160}\u{e8}\u{bc}\u{2030}\u{e7}\u{161}\u{201e}\u{e6}\u{2013}\u{2021}\u{e4}\u{bb}\u{b6}\u{e7}\u{201a}\u{ba}\u{e6}\u{ba}\u{2013})",
            Field::ChapterClassification,
        );
        m.insert(
            "\u{e6}\u{b6}\u{2030}\u{e5}\u{160}\u{e6}\u{a6}\u{201a}\u{e5}\u{bf}\u{b5}",
            Field::Concepts,
        );
        m.insert("MC\u{e9}\u{a1}\u{152}\u{e5}\u{2039}", Field::PatternTags);
        m.insert(
            "MC\u{e9}\u{b8}\u{e9}\u{a0}\u{2026}\u{e8}\u{a8}\u{ad}\u{e8}\u{a8}\u{2c6}",
            Field::OptionDesign,
        );
        m.insert("Remarks", Field::Remarks);

        // Clean headers as typed in the sheet.
        m.insert("多選題", Field::MultipleSelectionType);
        m.insert("答對百分比 (%)", Field::CorrectPercentage);
        m.insert("考試報告", Field::MarkersReport);
        m.insert("課程分類", Field::CurriculumClassification);
        m.insert("Aristo Learning Focus分類 (以上載的文件為準)", Field::ChapterClassification);
        m.insert("涉及概念", Field::Concepts);
        m.insert("MC題型", Field::PatternTags);
        m.insert("MC選項設計", Field::OptionDesign);
        m
    };
}

/// Fields every sheet must provide a column for.
pub const REQUIRED_FIELDS: [Field; 2] = [Field::Examination, Field::Id];

/// Question fields a sheet column can map to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Id,
    Examination,
    Year,
    Publisher,
    Paper,
    Section,
    QuestionNumber,
    QuestionType,
    QuestionTextChi,
    QuestionTextEng,
    Answer,
    MarkersReport,
    Remarks,
    OptionDesign,
    CurriculumClassification,
    ChapterClassification,
    Concepts,
    PatternTags,
    Marks,
    CorrectPercentage,
    MultipleSelectionType,
    GraphType,
    TableType,
    CalculationType,
}

/// How a raw cell is turned into a field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Leading float; unparseable cells leave the field unset.
    Number,
    /// Comma separated list, trimmed, empties dropped.
    Tags,
    /// Trimmed, `"-"` when empty.
    Indicator,
    /// `\n` escapes restored, outer whitespace trimmed.
    FreeText,
    /// Trimmed.
    Plain,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Examination => "examination",
            Field::Year => "year",
            Field::Publisher => "publisher",
            Field::Paper => "paper",
            Field::Section => "section",
            Field::QuestionNumber => "questionNumber",
            Field::QuestionType => "questionType",
            Field::QuestionTextChi => "questionTextChi",
            Field::QuestionTextEng => "questionTextEng",
            Field::Answer => "answer",
            Field::MarkersReport => "markersReport",
            Field::Remarks => "remarks",
            Field::OptionDesign => "optionDesign",
            Field::CurriculumClassification => "curriculumClassification",
            Field::ChapterClassification => "chapterClassification",
            Field::Concepts => "concepts",
            Field::PatternTags => "patternTags",
            Field::Marks => "marks",
            Field::CorrectPercentage => "correctPercentage",
            Field::MultipleSelectionType => "multipleSelectionType",
            Field::GraphType => "graphType",
            Field::TableType => "tableType",
            Field::CalculationType => "calculationType",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Year | Field::Marks | Field::CorrectPercentage => FieldKind::Number,
            Field::CurriculumClassification
            | Field::ChapterClassification
            | Field::Concepts
            | Field::PatternTags => FieldKind::Tags,
            Field::MultipleSelectionType
            | Field::GraphType
            | Field::TableType
            | Field::CalculationType => FieldKind::Indicator,
            Field::QuestionTextChi
            | Field::QuestionTextEng
            | Field::Answer
            | Field::MarkersReport
            | Field::Remarks => FieldKind::FreeText,
            Field::Id
            | Field::Examination
            | Field::Publisher
            | Field::Paper
            | Field::Section
            | Field::QuestionNumber
            | Field::QuestionType
            | Field::OptionDesign => FieldKind::Plain,
        }
    }

    /// Field a sheet header maps to, if any.
    pub fn from_header(header: &str) -> Option<Field> {
        HEADER_FIELDS.get(header).copied()
    }

    /// Coerce `raw` by this field's kind and store it on `question`.
    pub fn apply(&self, question: &mut Question, raw: &str) {
        match self.kind() {
            FieldKind::Number => match parse_leading_float(raw) {
                Some(n) => self.set_number(question, n),
                None => debug!("{}: `{}` is not a number, left unset", self.name(), raw),
            },
            FieldKind::Tags => {
                if let Some(slot) = self.tags_mut(question) {
                    *slot = split_tags(raw);
                }
            }
            FieldKind::Indicator => {
                if let Some(slot) = self.text_mut(question) {
                    let trimmed = raw.trim();
                    *slot = if trimmed.is_empty() {
                        NOT_APPLICABLE.to_string()
                    } else {
                        trimmed.to_string()
                    };
                }
            }
            FieldKind::FreeText => {
                if let Some(slot) = self.text_mut(question) {
                    *slot = unescape_newlines(raw).trim().to_string();
                }
            }
            FieldKind::Plain => {
                if let Some(slot) = self.text_mut(question) {
                    *slot = raw.trim().to_string();
                }
            }
        }
    }

    fn set_number(&self, question: &mut Question, n: f64) {
        match self {
            Field::Year => {
                if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 {
                    question.year = Some(n as i32);
                } else {
                    debug!("year `{n}` is not a whole number, left unset");
                }
            }
            Field::Marks => question.marks = n,
            Field::CorrectPercentage => question.correct_percentage = Some(n),
            _ => {}
        }
    }

    fn tags_mut<'a>(&self, q: &'a mut Question) -> Option<&'a mut Vec<String>> {
        match self {
            Field::CurriculumClassification => Some(&mut q.curriculum_classification),
            Field::ChapterClassification => Some(&mut q.chapter_classification),
            Field::Concepts => Some(&mut q.concepts),
            Field::PatternTags => Some(&mut q.pattern_tags),
            _ => None,
        }
    }

    fn text_mut<'a>(&self, q: &'a mut Question) -> Option<&'a mut String> {
        match self {
            Field::Id => Some(&mut q.id),
            Field::Examination => Some(&mut q.examination),
            Field::Publisher => Some(&mut q.publisher),
            Field::Paper => Some(&mut q.paper),
            Field::Section => Some(&mut q.section),
            Field::QuestionNumber => Some(&mut q.question_number),
            Field::QuestionType => Some(&mut q.question_type),
            Field::QuestionTextChi => Some(&mut q.question_text_chi),
            Field::QuestionTextEng => Some(&mut q.question_text_eng),
            Field::Answer => Some(&mut q.answer),
            Field::MarkersReport => Some(&mut q.markers_report),
            Field::Remarks => Some(&mut q.remarks),
            Field::OptionDesign => Some(&mut q.option_design),
            Field::MultipleSelectionType => Some(&mut q.multiple_selection_type),
            Field::GraphType => Some(&mut q.graph_type),
            Field::TableType => Some(&mut q.table_type),
            Field::CalculationType => Some(&mut q.calculation_type),
            _ => None,
        }
    }
}

/// Parse the numeric prefix of a cell (`"65%"` → 65.0), ignoring outer
/// whitespace.
pub fn parse_leading_float(raw: &str) -> Option<f64> {
    LEADING_FLOAT_REGEX
        .find(raw.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

/// Turn literal `\n` escapes back into newlines.
pub fn unescape_newlines(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedColumn {
    pub field: Field,
    pub column: usize,
    pub header: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedHeader {
    pub column: usize,
    pub header: String,
}

/// Result of matching the header row against the header dictionary.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMapping {
    pub columns: Vec<MappedColumn>,
    pub unmapped: Vec<UnmappedHeader>,
    pub warnings: Vec<String>,
}

impl HeaderMapping {
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut mapping = HeaderMapping::default();

        for (column, header) in headers.into_iter().enumerate() {
            let header = header.trim();
            match Field::from_header(header) {
                Some(field) => {
                    let mapped = MappedColumn {
                        field,
                        column,
                        header: header.to_string(),
                    };
                    if let Some(existing) = mapping.columns.iter_mut().find(|c| c.field == field)
                    {
                        let warning = format!(
                            "field `{}` mapped twice: column {} (\"{}\") replaces column {} (\"{}\")",
                            field.name(),
                            column + 1,
                            header,
                            existing.column + 1,
                            existing.header
                        );
                        warn!("{warning}");
                        mapping.warnings.push(warning);
                        *existing = mapped;
                    } else {
                        mapping.columns.push(mapped);
                    }
                }
                None if !header.is_empty() => {
                    debug!("column {} (\"{}\") not mapped, ignored", column + 1, header);
                    mapping.unmapped.push(UnmappedHeader {
                        column,
                        header: header.to_string(),
                    });
                }
                None => {}
            }
        }

        if !mapping.unmapped.is_empty() {
            let names: Vec<&str> = mapping.unmapped.iter().map(|h| h.header.as_str()).collect();
            mapping
                .warnings
                .push(format!("unrecognised columns ignored: {}", names.join(", ")));
        }

        mapping
    }

    pub fn column(&self, field: Field) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.column)
    }

    pub fn missing_required(&self) -> Vec<Field> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| self.column(*f).is_none())
            .collect()
    }
}

/// Something that went wrong for a single row or record without failing the
/// sync as a whole.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Anomaly {
    /// A data row without a usable `examination` or `id`. `row` is the 1-based
    /// position in the payload, header row included.
    #[serde(rename_all = "camelCase")]
    RowInvalid {
        row: usize,
        examination: String,
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    InsertFailed { id: String, reason: String },
}

/// A payload turned into validated records.
#[derive(Clone, Debug, Default)]
pub struct ParsedSheet {
    pub questions: Vec<Question>,
    pub mapping: HeaderMapping,
    pub anomalies: Vec<Anomaly>,
}

impl ParsedSheet {
    pub fn skipped_rows(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| matches!(a, Anomaly::RowInvalid { .. }))
            .count()
    }
}

/// Parse one sheet payload into question records
///
/// The first row is the header. Each later row becomes a record when it has
/// both an examination and an id; other rows are dropped and reported as
/// anomalies. Missing trailing cells leave their fields unset.
///
/// # Arguments
/// * `text` - Raw payload, rows split by U+001F and fields by U+001E
///
/// # Returns
/// * `SyncResult<ParsedSheet>` - Records, header mapping and anomalies, or
///   `EmptyPayload` / `SchemaInvalid` when the payload cannot be used at all
///
/// # Examples
/// ```
/// use exambank::sync::parse_sheet;
///
/// let text = "Exam\u{1e}Unique ID\u{1f}DSE\u{1e}Q1";
/// let sheet = parse_sheet(text).unwrap();
/// assert_eq!(sheet.questions[0].id, "Q1");
/// ```
pub fn parse_sheet(text: &str) -> SyncResult<ParsedSheet> {
    let rows: Vec<&str> = text
        .split(ROW_SEPARATOR)
        .filter(|row| !row.trim().is_empty())
        .collect();

    let Some((header_row, data_rows)) = rows.split_first() else {
        return Err(SyncError::EmptyPayload);
    };

    let mapping = HeaderMapping::from_headers(header_row.split(FIELD_SEPARATOR));
    let missing = mapping.missing_required();
    if !missing.is_empty() {
        return Err(SyncError::SchemaInvalid { missing });
    }

    let now = now_iso();
    let mut sheet = ParsedSheet {
        mapping,
        ..ParsedSheet::default()
    };

    for (i, row) in data_rows.iter().enumerate() {
        let cells: Vec<&str> = row.split(FIELD_SEPARATOR).collect();
        let mut question = Question {
            date_added: now.clone(),
            date_modified: now.clone(),
            ..Question::default()
        };

        for mapped in &sheet.mapping.columns {
            let raw = cells.get(mapped.column).copied().unwrap_or("");
            if raw.is_empty() {
                continue;
            }
            mapped.field.apply(&mut question, raw);
        }

        if is_valid_value(&question.examination) && is_valid_value(&question.id) {
            sheet.questions.push(question);
        } else {
            let row = i + 2;
            debug!(
                "row {row} skipped: missing required fields (examination: \"{}\", id: \"{}\")",
                question.examination, question.id
            );
            sheet.anomalies.push(Anomaly::RowInvalid {
                row,
                examination: question.examination,
                id: question.id,
            });
        }
    }

    let skipped = sheet.skipped_rows();
    if skipped > 0 {
        warn!("{skipped} sheet rows skipped for missing examination or id");
    }
    Ok(sheet)
}

/// Summary of one sync run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// False when the sheet held no valid rows and the store was left as is.
    pub applied: bool,
    pub imported: usize,
    pub parsed: usize,
    pub skipped_rows: usize,
    pub unmapped_headers: Vec<String>,
    pub warnings: Vec<String>,
    pub anomalies: Vec<Anomaly>,
    pub last_sync_time: Option<String>,
}

/// Replace the store contents with the parsed records.
///
/// A sheet without a single valid row leaves the store untouched.
pub fn apply_sheet(store: &mut QuestionStore, sheet: ParsedSheet) -> SyncResult<SyncReport> {
    let mut report = SyncReport {
        parsed: sheet.questions.len(),
        skipped_rows: sheet.skipped_rows(),
        unmapped_headers: sheet
            .mapping
            .unmapped
            .iter()
            .map(|h| h.header.clone())
            .collect(),
        warnings: sheet.mapping.warnings.clone(),
        anomalies: sheet.anomalies,
        ..SyncReport::default()
    };

    if sheet.questions.is_empty() {
        warn!("sheet has no valid questions, local store left unchanged");
        return Ok(report);
    }

    let bulk = store.replace_all(sheet.questions)?;
    report.applied = true;
    report.imported = bulk.inserted;
    report
        .anomalies
        .extend(bulk.failures.into_iter().map(|f| Anomaly::InsertFailed {
            id: f.id,
            reason: f.reason,
        }));
    Ok(report)
}

/// Download the raw sheet payload
///
/// Sends a GET to the sheet endpoint, with the username as a query parameter
/// when one is given.
///
/// # Arguments
/// * `client` - HTTP client, carrying any configured timeout
/// * `url` - Sheet endpoint
/// * `username` - Optional caller identity passed as `?username=`
///
/// # Returns
/// * `SyncResult<String>` - The payload text. Transport errors and
///   non-success statuses give `FetchFailed`; a body starting with `Error:`
///   gives `Remote`
pub async fn fetch_sheet(
    client: &reqwest::Client,
    url: &str,
    username: Option<&str>,
) -> SyncResult<String> {
    debug!("fetching sheet data from {url}");
    let mut request = client.get(url);
    if let Some(username) = username {
        request = request.query(&[("username", username)]);
    }

    let response = request
        .send()
        .await
        .map_err(|e| SyncError::FetchFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::FetchFailed(format!("HTTP {status}")));
    }

    let text = response
        .text()
        .await
        .map_err(|e| SyncError::FetchFailed(e.to_string()))?;

    if text.starts_with(REMOTE_ERROR_PREFIX) {
        return Err(SyncError::Remote(text.trim().to_string()));
    }
    Ok(text)
}

/// A configured connection to the question sheet.
#[derive(Debug, Clone)]
pub struct SheetSync {
    url: String,
    username: Option<String>,
    client: reqwest::Client,
    last_sync: Option<DateTime<Utc>>,
}

impl SheetSync {
    pub fn new(url: impl Into<String>) -> SyncResult<Self> {
        Self::build(url.into(), None, None)
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| SyncError::FetchFailed("no sheet URL configured".to_string()))?;
        Self::build(
            url,
            config.username.clone(),
            config.timeout_secs.map(Duration::from_secs),
        )
    }

    fn build(url: String, username: Option<String>, timeout: Option<Duration>) -> SyncResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SyncError::FetchFailed(e.to_string()))?;
        Ok(SheetSync {
            url,
            username,
            client,
            last_sync: None,
        })
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// Fetch and parse without touching any store.
    pub async fn fetch(&self) -> SyncResult<ParsedSheet> {
        let text = fetch_sheet(&self.client, &self.url, self.username.as_deref()).await?;
        parse_sheet(&text)
    }

    /// Apply an already fetched sheet and remember when it happened.
    pub fn apply(&mut self, store: &mut QuestionStore, sheet: ParsedSheet) -> SyncResult<SyncReport> {
        let mut report = apply_sheet(store, sheet)?;
        if report.applied {
            let now = Utc::now();
            let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
            store.record_sync(&stamp)?;
            self.last_sync = Some(now);
            report.last_sync_time = Some(stamp);
            info!("sync complete: {} questions imported", report.imported);
        }
        Ok(report)
    }

    /// Fetch, parse and replace the store contents. Nothing in the store
    /// changes unless fetching and header validation both succeed.
    pub async fn sync(&mut self, store: &mut QuestionStore) -> SyncResult<SyncReport> {
        info!("syncing questions from {}", self.url);
        let sheet = self.fetch().await?;
        self.apply(store, sheet)
    }
}
