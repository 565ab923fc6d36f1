use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel stored in the feature-indicator fields when the indicator does not
/// apply to a question.
pub const NOT_APPLICABLE: &str = "-";

/// Question type label counted as multiple choice in the statistics views.
pub const QTYPE_MC: &str = "MC";

/// Question type label counted as a written (short/long) question.
pub const QTYPE_TEXT: &str = "文字題 (SQ/LQ)";

/// A single catalogued exam question.
///
/// Field names serialize in camelCase so exported documents keep the same
/// shape as the sheet-backed catalogue they come from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub examination: String,
    #[serde(default)]
    pub year: Option<i32>,

    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub question_number: String,
    #[serde(default)]
    pub question_type: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub paper: String,

    #[serde(default)]
    pub question_text_chi: String,
    #[serde(default)]
    pub question_text_eng: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub markers_report: String,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub option_design: String,

    #[serde(default)]
    pub curriculum_classification: Vec<String>,
    #[serde(default, alias = "AristochapterClassification")]
    pub chapter_classification: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub pattern_tags: Vec<String>,

    #[serde(default)]
    pub marks: f64,
    #[serde(default)]
    pub correct_percentage: Option<f64>,

    #[serde(default = "not_applicable")]
    pub multiple_selection_type: String,
    #[serde(default = "not_applicable")]
    pub graph_type: String,
    #[serde(default = "not_applicable")]
    pub table_type: String,
    #[serde(default = "not_applicable")]
    pub calculation_type: String,

    #[serde(default)]
    pub date_added: String,
    #[serde(default)]
    pub date_modified: String,
}

fn not_applicable() -> String {
    NOT_APPLICABLE.to_string()
}

impl Default for Question {
    fn default() -> Self {
        Self {
            id: String::new(),
            examination: String::new(),
            year: None,
            section: String::new(),
            question_number: String::new(),
            question_type: String::new(),
            publisher: String::new(),
            paper: String::new(),
            question_text_chi: String::new(),
            question_text_eng: String::new(),
            answer: String::new(),
            markers_report: String::new(),
            remarks: String::new(),
            option_design: String::new(),
            curriculum_classification: Vec::new(),
            chapter_classification: Vec::new(),
            concepts: Vec::new(),
            pattern_tags: Vec::new(),
            marks: 0.0,
            correct_percentage: None,
            multiple_selection_type: not_applicable(),
            graph_type: not_applicable(),
            table_type: not_applicable(),
            calculation_type: not_applicable(),
            date_added: String::new(),
            date_modified: String::new(),
        }
    }
}

/// Key used for the soft "this looks like a duplicate" warning. Two records
/// sharing it may still both be stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DuplicateKey<'a> {
    pub examination: &'a str,
    pub year: Option<i32>,
    pub section: &'a str,
    pub question_number: &'a str,
}

impl Question {
    /// Create a question with both timestamps set to now.
    pub fn new(id: impl Into<String>, examination: impl Into<String>) -> Self {
        let now = now_iso();
        Question {
            id: id.into(),
            examination: examination.into(),
            date_added: now.clone(),
            date_modified: now,
            ..Question::default()
        }
    }

    /// A record may be stored only when both `id` and `examination` carry a
    /// real value.
    pub fn is_importable(&self) -> bool {
        is_valid_value(&self.id) && is_valid_value(&self.examination)
    }

    pub fn duplicate_key(&self) -> DuplicateKey<'_> {
        DuplicateKey {
            examination: &self.examination,
            year: self.year,
            section: &self.section,
            question_number: &self.question_number,
        }
    }

    /// Refresh `dateModified`, and fill `dateAdded` if it was never set.
    pub fn touch(&mut self) {
        let now = now_iso();
        if self.date_added.is_empty() {
            self.date_added = now.clone();
        }
        self.date_modified = now;
    }
}

/// A value counts as present when it is non-blank and not the `"-"` sentinel.
pub fn is_valid_value(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && trimmed != NOT_APPLICABLE
}

/// Current UTC time in the same ISO-8601 form browsers produce
/// (`2024-05-01T08:30:00.000Z`).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Split a comma separated tag list, trimming pieces and dropping empties.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Manually entered question content, as submitted from the entry form or the
/// API. Normalized into a [`Question`] by [`QuestionDraft::into_question`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionDraft {
    pub id: String,
    pub examination: String,
    pub year: Option<i32>,
    pub section: String,
    pub question_number: String,
    pub question_type: String,
    pub publisher: String,
    pub paper: String,
    pub question_text_chi: String,
    pub question_text_eng: String,
    pub answer: String,
    pub markers_report: String,
    pub remarks: String,
    pub option_design: String,
    pub curriculum_classification: Vec<String>,
    #[serde(alias = "AristochapterClassification")]
    pub chapter_classification: Vec<String>,
    pub concepts: Vec<String>,
    pub pattern_tags: Vec<String>,
    pub marks: Option<f64>,
    pub correct_percentage: Option<f64>,
    pub multiple_selection_type: String,
    pub graph_type: String,
    pub table_type: String,
    pub calculation_type: String,
}

impl QuestionDraft {
    /// Trim every text field, clean the tag lists and fill empty indicators
    /// with `"-"`. Timestamps are left empty for the store to stamp.
    pub fn into_question(self) -> Question {
        Question {
            id: self.id.trim().to_string(),
            examination: self.examination.trim().to_string(),
            year: self.year,
            section: self.section.trim().to_string(),
            question_number: self.question_number.trim().to_string(),
            question_type: self.question_type.trim().to_string(),
            publisher: self.publisher.trim().to_string(),
            paper: self.paper.trim().to_string(),
            question_text_chi: self.question_text_chi.trim().to_string(),
            question_text_eng: self.question_text_eng.trim().to_string(),
            answer: self.answer.trim().to_string(),
            markers_report: self.markers_report.trim().to_string(),
            remarks: self.remarks.trim().to_string(),
            option_design: self.option_design.trim().to_string(),
            curriculum_classification: clean_tags(self.curriculum_classification),
            chapter_classification: clean_tags(self.chapter_classification),
            concepts: clean_tags(self.concepts),
            pattern_tags: clean_tags(self.pattern_tags),
            marks: self.marks.filter(|m| m.is_finite()).unwrap_or(0.0),
            correct_percentage: self.correct_percentage.filter(|p| p.is_finite()),
            multiple_selection_type: indicator(&self.multiple_selection_type),
            graph_type: indicator(&self.graph_type),
            table_type: indicator(&self.table_type),
            calculation_type: indicator(&self.calculation_type),
            date_added: String::new(),
            date_modified: String::new(),
        }
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.iter().flat_map(|t| split_tags(t)).collect()
}

fn indicator(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        not_applicable()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_and_blank_are_not_valid_values() {
        assert!(!is_valid_value(""));
        assert!(!is_valid_value("   "));
        assert!(!is_valid_value("-"));
        assert!(!is_valid_value(" - "));
        assert!(is_valid_value("DSE"));
    }

    #[test]
    fn default_question_marks_indicators_not_applicable() {
        let q = Question::default();
        assert_eq!(q.graph_type, "-");
        assert_eq!(q.table_type, "-");
        assert_eq!(q.multiple_selection_type, "-");
        assert_eq!(q.calculation_type, "-");
        assert_eq!(q.marks, 0.0);
        assert!(q.concepts.is_empty());
    }

    #[test]
    fn missing_json_fields_take_defaults() {
        let q: Question =
            serde_json::from_str(r#"{"id":"Q1","examination":"DSE","year":2020}"#).unwrap();
        assert_eq!(q.year, Some(2020));
        assert_eq!(q.graph_type, "-");
        assert!(q.curriculum_classification.is_empty());
        assert_eq!(q.correct_percentage, None);
    }

    #[test]
    fn legacy_chapter_key_is_accepted() {
        let q: Question = serde_json::from_str(
            r#"{"id":"Q1","examination":"DSE","AristochapterClassification":["Ch03"]}"#,
        )
        .unwrap();
        assert_eq!(q.chapter_classification, vec!["Ch03"]);
    }

    #[test]
    fn draft_normalizes_form_input() {
        let draft = QuestionDraft {
            id: " Q7 ".into(),
            examination: "DSE".into(),
            concepts: vec!["supply, demand".into(), " ".into()],
            graph_type: "  ".into(),
            table_type: "bar".into(),
            marks: Some(f64::NAN),
            ..QuestionDraft::default()
        };
        let q = draft.into_question();
        assert_eq!(q.id, "Q7");
        assert_eq!(q.concepts, vec!["supply", "demand"]);
        assert_eq!(q.graph_type, "-");
        assert_eq!(q.table_type, "bar");
        assert_eq!(q.marks, 0.0);
    }

    #[test]
    fn duplicate_key_ignores_content_fields() {
        let mut a = Question::new("A", "DSE");
        a.year = Some(2019);
        a.section = "A".into();
        a.question_number = "3".into();
        let mut b = a.clone();
        b.id = "B".into();
        b.question_text_eng = "different".into();
        assert_eq!(a.duplicate_key(), b.duplicate_key());
    }
}
