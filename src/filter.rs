//! Filter engine: a pure function from a record list and a filter
//! specification to the matching records.
//!
//! Every axis of [`FilterSpec`] is optional. An axis with nothing selected
//! imposes no constraint, and all active axes combine with AND.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::model::{NOT_APPLICABLE, Question};
use crate::view::chapter_tag;

/// Per-tag selection state. Toggling cycles `Unset → Included → Excluded →
/// Unset`, so a tag can never be both included and excluded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    #[default]
    Unset,
    Included,
    Excluded,
}

impl TriState {
    pub fn next(self) -> Self {
        match self {
            TriState::Unset => TriState::Included,
            TriState::Included => TriState::Excluded,
            TriState::Excluded => TriState::Unset,
        }
    }
}

/// Tri-state selections for one tag category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagFilter<K: Ord> {
    states: BTreeMap<K, TriState>,
}

impl<K: Ord + Clone> Default for TagFilter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> TagFilter<K> {
    pub fn new() -> Self {
        TagFilter {
            states: BTreeMap::new(),
        }
    }

    pub fn state(&self, tag: &K) -> TriState {
        self.states.get(tag).copied().unwrap_or_default()
    }

    pub fn set(&mut self, tag: K, state: TriState) {
        if state == TriState::Unset {
            self.states.remove(&tag);
        } else {
            self.states.insert(tag, state);
        }
    }

    /// Advance one tag to its next state and return the new state.
    pub fn toggle(&mut self, tag: K) -> TriState {
        let next = self.state(&tag).next();
        self.set(tag, next);
        next
    }

    pub fn include(mut self, tag: K) -> Self {
        self.set(tag, TriState::Included);
        self
    }

    pub fn exclude(mut self, tag: K) -> Self {
        self.set(tag, TriState::Excluded);
        self
    }

    pub fn included(&self) -> impl Iterator<Item = &K> {
        self.with_state(TriState::Included)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &K> {
        self.with_state(TriState::Excluded)
    }

    pub fn is_active(&self) -> bool {
        self.states.values().any(|s| *s != TriState::Unset)
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Included tags OR together; excluded tags must all be absent.
    fn matches(&self, has: impl Fn(&K) -> bool) -> bool {
        let mut included = self.included().peekable();
        if included.peek().is_some() && !included.any(|tag| has(tag)) {
            return false;
        }
        !self.excluded().any(|tag| has(tag))
    }

    fn with_state(&self, state: TriState) -> impl Iterator<Item = &K> {
        self.states
            .iter()
            .filter(move |(_, s)| **s == state)
            .map(|(k, _)| k)
    }
}

/// Derived "has X" predicates over the feature-indicator fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    Graph,
    Table,
    Calculation,
    MultipleSelection,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::Graph,
        Feature::Table,
        Feature::Calculation,
        Feature::MultipleSelection,
    ];

    /// Label shown in the feature filter list.
    pub fn label(&self) -> &'static str {
        match self {
            Feature::Graph => "含圖表",
            Feature::Table => "含表格",
            Feature::Calculation => "含計算",
            Feature::MultipleSelection => "複選",
        }
    }

    /// Values of the indicator field that mean "this question has none".
    pub fn none_values(&self) -> &'static [&'static str] {
        match self {
            Feature::Graph => &[NOT_APPLICABLE, "沒有圖"],
            Feature::Table => &[NOT_APPLICABLE, "沒有表格"],
            Feature::Calculation => &[NOT_APPLICABLE, "沒有計算"],
            Feature::MultipleSelection => &[NOT_APPLICABLE, "並非複選型", "不適用"],
        }
    }

    pub fn field<'a>(&self, question: &'a Question) -> &'a str {
        match self {
            Feature::Graph => &question.graph_type,
            Feature::Table => &question.table_type,
            Feature::Calculation => &question.calculation_type,
            Feature::MultipleSelection => &question.multiple_selection_type,
        }
    }

    pub fn present_in(&self, question: &Question) -> bool {
        let value = self.field(question).trim();
        !value.is_empty() && !self.none_values().contains(&value)
    }

    /// Accepts the English name or the filter label.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Feature::ALL.into_iter().find(|f| {
            f.label() == value
                || match f {
                    Feature::Graph => value.eq_ignore_ascii_case("graph"),
                    Feature::Table => value.eq_ignore_ascii_case("table"),
                    Feature::Calculation => value.eq_ignore_ascii_case("calculation"),
                    Feature::MultipleSelection => {
                        value.eq_ignore_ascii_case("multiple")
                            || value.eq_ignore_ascii_case("multipleSelection")
                    }
                }
        })
    }
}

/// Inclusive numeric range over an optional field. Only constrains records
/// once the selected range differs from the default bounds.
///
/// The bounds belong to the axis, not to the caller: on the wire a range is
/// just `{min, max}`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RangeFilter {
    pub min: f64,
    pub max: f64,
    #[serde(skip)]
    lower_bound: f64,
    #[serde(skip)]
    upper_bound: f64,
}

/// Wire form of a range selection. A missing end stays at the axis bound.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct RangeSelection {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

pub const PERCENTAGE_BOUNDS: (f64, f64) = (0.0, 100.0);
pub const MARKS_BOUNDS: (f64, f64) = (0.0, 20.0);

impl RangeFilter {
    pub fn full(bounds: (f64, f64)) -> Self {
        RangeFilter {
            min: bounds.0,
            max: bounds.1,
            lower_bound: bounds.0,
            upper_bound: bounds.1,
        }
    }

    pub fn percentage() -> Self {
        Self::full(PERCENTAGE_BOUNDS)
    }

    pub fn marks() -> Self {
        Self::full(MARKS_BOUNDS)
    }

    /// Narrow the range. A minimum above the maximum is pulled down to it.
    pub fn select(mut self, min: f64, max: f64) -> Self {
        self.max = max;
        self.min = min.min(max);
        self
    }

    /// Narrow the full range of an axis to what the caller selected.
    pub fn from_selection(bounds: (f64, f64), selection: RangeSelection) -> Self {
        Self::full(bounds).select(
            selection.min.unwrap_or(bounds.0),
            selection.max.unwrap_or(bounds.1),
        )
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower_bound, self.upper_bound)
    }

    pub fn is_active(&self) -> bool {
        self.min > self.lower_bound || self.max < self.upper_bound
    }

    pub fn reset(&mut self) {
        self.min = self.lower_bound;
        self.max = self.upper_bound;
    }

    fn matches(&self, value: Option<f64>) -> bool {
        if !self.is_active() {
            return true;
        }
        match value {
            Some(v) if v.is_finite() => v >= self.min && v <= self.max,
            _ => false,
        }
    }
}

/// Explicit, immutable description of what the user selected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub search: Option<String>,
    pub examination: Option<String>,
    pub year: Option<i32>,
    pub question_type: Option<String>,
    #[serde(deserialize_with = "percentage_range")]
    pub correct_percentage: RangeFilter,
    #[serde(deserialize_with = "marks_range")]
    pub marks: RangeFilter,
    pub curriculum: TagFilter<String>,
    /// Bare chapter numbers ("5", "05"); compared as `Ch05`.
    pub chapter: TagFilter<String>,
    pub features: TagFilter<Feature>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        FilterSpec {
            search: None,
            examination: None,
            year: None,
            question_type: None,
            correct_percentage: RangeFilter::percentage(),
            marks: RangeFilter::marks(),
            curriculum: TagFilter::new(),
            chapter: TagFilter::new(),
            features: TagFilter::new(),
        }
    }
}

impl FilterSpec {
    /// True when no axis constrains anything.
    pub fn is_empty(&self) -> bool {
        non_blank(&self.search).is_none()
            && non_blank(&self.examination).is_none()
            && self.year.is_none()
            && non_blank(&self.question_type).is_none()
            && !self.correct_percentage.is_active()
            && !self.marks.is_active()
            && !self.curriculum.is_active()
            && !self.chapter.is_active()
            && !self.features.is_active()
    }

    pub fn matches(&self, q: &Question) -> bool {
        if let Some(term) = non_blank(&self.search) {
            if !matches_search(q, &term.to_lowercase()) {
                return false;
            }
        }
        if let Some(exam) = non_blank(&self.examination) {
            if q.examination != exam {
                return false;
            }
        }
        if let Some(year) = self.year {
            if q.year != Some(year) {
                return false;
            }
        }
        if let Some(qtype) = non_blank(&self.question_type) {
            if q.question_type != qtype {
                return false;
            }
        }

        self.correct_percentage.matches(q.correct_percentage)
            && self.marks.matches(Some(q.marks))
            && self
                .curriculum
                .matches(|tag| q.curriculum_classification.iter().any(|c| c == tag))
            && self.chapter.matches(|number| {
                let wanted = chapter_tag(number);
                q.chapter_classification.iter().any(|c| *c == wanted)
            })
            && self.features.matches(|feature| feature.present_in(q))
    }
}

fn percentage_range<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RangeFilter, D::Error> {
    RangeSelection::deserialize(deserializer)
        .map(|selection| RangeFilter::from_selection(PERCENTAGE_BOUNDS, selection))
}

fn marks_range<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RangeFilter, D::Error> {
    RangeSelection::deserialize(deserializer)
        .map(|selection| RangeFilter::from_selection(MARKS_BOUNDS, selection))
}

/// Filter a record list down to the records a specification selects.
///
/// Every active axis must hold for a record to be kept. The input is never
/// modified and calling this twice with the same arguments gives the same
/// result.
///
/// # Arguments
/// * `records` - Records to filter, usually the whole store in insertion order
/// * `spec` - What the user selected; an empty spec keeps every record
///
/// # Returns
/// * `Vec<Question>` - The matching records, in their original order
///
/// # Examples
/// ```
/// use exambank::filter::{self, FilterSpec};
/// use exambank::model::Question;
///
/// let records = vec![Question::new("Q1", "DSE"), Question::new("Q2", "CE")];
/// let spec = FilterSpec {
///     examination: Some("CE".into()),
///     ..FilterSpec::default()
/// };
/// assert_eq!(filter::apply(&records, &spec)[0].id, "Q2");
/// ```
pub fn apply(records: &[Question], spec: &FilterSpec) -> Vec<Question> {
    records.iter().filter(|q| spec.matches(q)).cloned().collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn matches_search(q: &Question, needle: &str) -> bool {
    [
        &q.id,
        &q.examination,
        &q.section,
        &q.question_number,
        &q.question_text_chi,
        &q.question_text_eng,
        &q.publisher,
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_cycles_through_three_states() {
        let mut f: TagFilter<String> = TagFilter::new();
        assert_eq!(f.toggle("A".into()), TriState::Included);
        assert_eq!(f.toggle("A".into()), TriState::Excluded);
        assert_eq!(f.toggle("A".into()), TriState::Unset);
        assert!(!f.is_active());
    }

    #[test]
    fn range_at_default_bounds_is_inactive() {
        assert!(!RangeFilter::percentage().is_active());
        assert!(RangeFilter::percentage().select(10.0, 100.0).is_active());
        assert!(RangeFilter::percentage().select(0.0, 99.0).is_active());
    }

    #[test]
    fn wire_range_keeps_the_axis_bounds() {
        let range = RangeFilter::from_selection(
            MARKS_BOUNDS,
            RangeSelection {
                min: Some(4.0),
                max: None,
            },
        );
        assert_eq!(range.bounds(), MARKS_BOUNDS);
        assert_eq!(range.max, 20.0);
        assert!(range.is_active());
    }

    #[test]
    fn select_clamps_min_to_max() {
        let r = RangeFilter::percentage().select(80.0, 40.0);
        assert_eq!(r.min, 40.0);
        assert_eq!(r.max, 40.0);
    }

    #[test]
    fn feature_none_values_hide_the_feature() {
        let mut q = Question::new("Q1", "DSE");
        assert!(!Feature::Graph.present_in(&q));
        q.graph_type = "沒有圖".into();
        assert!(!Feature::Graph.present_in(&q));
        q.graph_type = "曲線圖".into();
        assert!(Feature::Graph.present_in(&q));
        q.multiple_selection_type = "不適用".into();
        assert!(!Feature::MultipleSelection.present_in(&q));
    }

    #[test]
    fn feature_parse_accepts_labels_and_names() {
        assert_eq!(Feature::parse("含表格"), Some(Feature::Table));
        assert_eq!(Feature::parse("multiple"), Some(Feature::MultipleSelection));
        assert_eq!(Feature::parse("Graph"), Some(Feature::Graph));
        assert_eq!(Feature::parse("colour"), None);
    }

    #[test]
    fn default_spec_is_empty() {
        assert!(FilterSpec::default().is_empty());
        let spec = FilterSpec {
            search: Some("  ".into()),
            ..FilterSpec::default()
        };
        assert!(spec.is_empty());
    }
}
