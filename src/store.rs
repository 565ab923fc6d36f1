use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};
use crate::filter::{self, FilterSpec};
use crate::model::{Question, QuestionDraft, is_valid_value, now_iso};

/// Name-keyed comment tables kept next to the questions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    Publishers,
    Topics,
    Concepts,
    Patterns,
}

impl MetadataKind {
    pub const ALL: [MetadataKind; 4] = [
        MetadataKind::Publishers,
        MetadataKind::Topics,
        MetadataKind::Concepts,
        MetadataKind::Patterns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKind::Publishers => "publishers",
            MetadataKind::Topics => "topics",
            MetadataKind::Concepts => "concepts",
            MetadataKind::Patterns => "patterns",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "publishers" | "publisher" => Some(MetadataKind::Publishers),
            "topics" | "topic" => Some(MetadataKind::Topics),
            "concepts" | "concept" => Some(MetadataKind::Concepts),
            "patterns" | "pattern" => Some(MetadataKind::Patterns),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub name: String,
    pub comment: String,
}

type CommentTables = BTreeMap<MetadataKind, BTreeMap<String, String>>;

/// Everything persisted in the store file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Tables {
    questions: Vec<Question>,
    metadata: CommentTables,
    last_sync: Option<String>,
}

/// One record that a bulk insert could not store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InsertFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of [`QuestionStore::replace_all`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BulkReport {
    pub inserted: usize,
    pub failures: Vec<InsertFailure>,
}

/// Export document written by [`QuestionStore::export_json`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub export_date: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub metadata: CommentTables,
}

const EXPORT_VERSION: u32 = 1;

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportDocument {
    Full(ExportDocument),
    Bare(Vec<Question>),
}

/// Local question table keyed by `id`, persisted as gzip-compressed bincode.
///
/// Records keep their insertion order. Every mutating call writes the file
/// before returning, so a later read always sees the write. A call that fails
/// leaves both the file and the in-memory tables as they were.
#[derive(Debug)]
pub struct QuestionStore {
    path: Option<PathBuf>,
    tables: Tables,
    index: HashMap<String, usize>,
}

impl QuestionStore {
    /// Open the question store backed by a file
    ///
    /// Creates the parent directories and an empty store file when nothing
    /// exists at `path` yet. Opening the same path twice yields the same
    /// contents.
    ///
    /// # Arguments
    /// * `path` - Location of the gzip-compressed store file
    ///
    /// # Returns
    /// * `StoreResult<QuestionStore>` - The opened store, or `Unavailable` when
    ///   the file cannot be created, read or decoded
    ///
    /// # Examples
    /// ```no_run
    /// use exambank::store::QuestionStore;
    ///
    /// match QuestionStore::open("database/questions.bin.gz") {
    ///     Ok(store) => println!("{} questions stored", store.len()),
    ///     Err(e) => eprintln!("Error opening store: {}", e),
    /// }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let tables = if path.exists() {
            read_tables(&path).map_err(|e| unavailable(&path, e))?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| unavailable(&path, e))?;
            }
            let tables = Tables::default();
            write_tables(&path, &tables).map_err(|e| unavailable(&path, e))?;
            tables
        };

        let mut store = QuestionStore {
            path: Some(path),
            tables,
            index: HashMap::new(),
        };
        store.reindex();
        info!(
            "question store opened at {} ({} questions)",
            store.path_display(),
            store.len()
        );
        Ok(store)
    }

    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        QuestionStore {
            path: None,
            tables: Tables::default(),
            index: HashMap::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tables.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.questions.is_empty()
    }

    /// Borrow every record in insertion order.
    pub fn questions(&self) -> &[Question] {
        &self.tables.questions
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.index.get(id).map(|&i| &self.tables.questions[i])
    }

    /// Insert one record. Fails with `DuplicateKey` when the id is taken.
    pub fn add(&mut self, question: Question) -> StoreResult<()> {
        self.transact(|store| store.insert(question))
    }

    /// Replace the content of an existing record. `id` and `dateAdded` are
    /// kept; `dateModified` is refreshed.
    pub fn update(&mut self, id: &str, draft: QuestionDraft) -> StoreResult<Question> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = draft.into_question();
        updated.id = id.to_string();
        if !is_valid_value(&updated.examination) {
            return Err(StoreError::InvalidRecord(format!(
                "question `{id}` needs an examination"
            )));
        }

        updated.date_added = self.tables.questions[idx].date_added.clone();
        updated.touch();

        let stored = updated.clone();
        self.transact(|store| {
            store.tables.questions[idx] = stored;
            Ok(())
        })?;
        debug!("question {id} updated");
        Ok(updated)
    }

    /// Every record, optionally narrowed by a filter specification.
    pub fn get_all(&self, spec: Option<&FilterSpec>) -> Vec<Question> {
        match spec {
            Some(spec) => filter::apply(&self.tables.questions, spec),
            None => self.tables.questions.clone(),
        }
    }

    /// Remove a record. Returns whether anything was removed; an unknown id
    /// is not an error.
    pub fn delete(&mut self, id: &str) -> StoreResult<bool> {
        let Some(&idx) = self.index.get(id) else {
            return Ok(false);
        };
        self.transact(|store| {
            store.tables.questions.remove(idx);
            store.reindex();
            Ok(())
        })?;
        debug!("question {id} deleted");
        Ok(true)
    }

    /// Remove every question and every comment.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.transact(|store| {
            store.clear_tables();
            Ok(())
        })?;
        info!("question store cleared");
        Ok(())
    }

    /// First stored record sharing the duplicate key of `question`, other than
    /// `question` itself.
    pub fn find_duplicate(&self, question: &Question) -> Option<&Question> {
        let key = question.duplicate_key();
        self.tables
            .questions
            .iter()
            .find(|q| q.id != question.id && q.duplicate_key() == key)
    }

    /// Clear the store, then add each record in order. A record that cannot be
    /// stored is reported and skipped; the rest of the batch still lands. The
    /// file is written once, after the whole batch.
    pub fn replace_all(&mut self, questions: Vec<Question>) -> StoreResult<BulkReport> {
        let report = self.transact(|store| Ok(store.refill(questions)))?;
        info!(
            "replaced store contents: {} inserted, {} failed",
            report.inserted,
            report.failures.len()
        );
        Ok(report)
    }

    pub fn set_comment(&mut self, kind: MetadataKind, name: &str, comment: &str) -> StoreResult<()> {
        self.transact(|store| {
            store
                .tables
                .metadata
                .entry(kind)
                .or_default()
                .insert(name.to_string(), comment.to_string());
            Ok(())
        })
    }

    /// Comment stored for `name`, or an empty string.
    pub fn comment(&self, kind: MetadataKind, name: &str) -> String {
        self.tables
            .metadata
            .get(&kind)
            .and_then(|table| table.get(name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn comments(&self, kind: MetadataKind) -> Vec<MetadataEntry> {
        self.tables
            .metadata
            .get(&kind)
            .map(|table| {
                table
                    .iter()
                    .map(|(name, comment)| MetadataEntry {
                        name: name.clone(),
                        comment: comment.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serialize every question and comment into a pretty JSON document.
    pub fn export_json(&self) -> StoreResult<String> {
        let document = ExportDocument {
            version: EXPORT_VERSION,
            export_date: now_iso(),
            questions: self.tables.questions.clone(),
            metadata: self.tables.metadata.clone(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Replace the store with the contents of an exported document (or a bare
    /// JSON array of questions). Returns how many questions were stored.
    pub fn import_json(&mut self, text: &str) -> StoreResult<usize> {
        let (questions, metadata) = match serde_json::from_str::<ImportDocument>(text) {
            Ok(ImportDocument::Full(doc)) => (doc.questions, doc.metadata),
            Ok(ImportDocument::Bare(questions)) => (questions, CommentTables::new()),
            Err(_) => {
                // Re-parse as the full document to surface a useful message.
                let doc: ExportDocument = serde_json::from_str(text)?;
                (doc.questions, doc.metadata)
            }
        };

        let report = self.transact(|store| {
            let report = store.refill(questions);
            if !metadata.is_empty() {
                store.tables.metadata = metadata;
            }
            Ok(report)
        })?;
        info!("imported {} questions", report.inserted);
        Ok(report.inserted)
    }

    /// When the last successful sync replaced the store (RFC 3339).
    pub fn last_sync(&self) -> Option<&str> {
        self.tables.last_sync.as_deref()
    }

    pub fn record_sync(&mut self, at: &str) -> StoreResult<()> {
        self.transact(|store| {
            store.tables.last_sync = Some(at.to_string());
            Ok(())
        })
    }

    // Run `change` and write the result. If either step fails the tables are
    // restored, so memory never runs ahead of the file.
    fn transact<T>(&mut self, change: impl FnOnce(&mut Self) -> StoreResult<T>) -> StoreResult<T> {
        let snapshot = self.tables.clone();
        let result = change(&mut *self).and_then(|value| self.persist().map(|()| value));
        if result.is_err() {
            self.tables = snapshot;
            self.reindex();
        }
        result
    }

    fn refill(&mut self, questions: Vec<Question>) -> BulkReport {
        self.clear_tables();

        let mut report = BulkReport::default();
        for question in questions {
            let id = question.id.clone();
            match self.insert(question) {
                Ok(()) => report.inserted += 1,
                Err(err) => {
                    warn!("failed to store question {id}: {err}");
                    report.failures.push(InsertFailure {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }

    fn insert(&mut self, mut question: Question) -> StoreResult<()> {
        if !question.is_importable() {
            return Err(StoreError::InvalidRecord(format!(
                "question needs an id and an examination (id: `{}`, examination: `{}`)",
                question.id, question.examination
            )));
        }
        if self.index.contains_key(&question.id) {
            return Err(StoreError::DuplicateKey(question.id));
        }
        if question.date_added.is_empty() || question.date_modified.is_empty() {
            question.touch();
        }

        self.index
            .insert(question.id.clone(), self.tables.questions.len());
        self.tables.questions.push(question);
        Ok(())
    }

    // The last sync time survives a clear; it describes the remote, not the
    // records.
    fn clear_tables(&mut self) {
        self.tables = Tables {
            last_sync: self.tables.last_sync.take(),
            ..Tables::default()
        };
        self.index.clear();
    }

    fn reindex(&mut self) {
        self.index = self
            .tables
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id.clone(), i))
            .collect();
    }

    fn persist(&self) -> StoreResult<()> {
        match &self.path {
            Some(path) => write_tables(path, &self.tables),
            None => Ok(()),
        }
    }

    fn path_display(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn read_tables(path: &Path) -> StoreResult<Tables> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let tables: Tables = deserialize_from(&mut reader)?;
    Ok(tables)
}

// Write through a temp file in the same directory so a crash never leaves a
// half-written store behind.
fn write_tables(path: &Path, tables: &Tables) -> StoreResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;

    {
        let encoder = GzEncoder::new(tmp.as_file(), Compression::default());
        let mut writer = BufWriter::new(encoder);
        serialize_into(&mut writer, tables)?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question::new(id, "DSE")
    }

    #[test]
    fn metadata_kind_parses_singular_and_plural() {
        assert_eq!(MetadataKind::parse("Topic"), Some(MetadataKind::Topics));
        assert_eq!(MetadataKind::parse("patterns"), Some(MetadataKind::Patterns));
        assert_eq!(MetadataKind::parse("chapters"), None);
    }

    #[test]
    fn add_stamps_missing_timestamps() {
        let mut store = QuestionStore::in_memory();
        let q = Question {
            id: "Q1".into(),
            examination: "DSE".into(),
            ..Question::default()
        };
        store.add(q).unwrap();
        let stored = store.get("Q1").unwrap();
        assert!(!stored.date_added.is_empty());
        assert!(!stored.date_modified.is_empty());
    }

    #[test]
    fn delete_keeps_index_consistent() {
        let mut store = QuestionStore::in_memory();
        for id in ["A", "B", "C"] {
            store.add(question(id)).unwrap();
        }
        assert!(store.delete("A").unwrap());
        assert_eq!(store.get("C").unwrap().id, "C");
        assert_eq!(store.get("B").unwrap().id, "B");
        assert!(store.get("A").is_none());
    }
}
