//! Question counts grouped by publisher, curriculum topic, chapter, concept
//! and pattern, each split into multiple-choice and written questions.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::model::{QTYPE_MC, QTYPE_TEXT, Question};
use crate::store::{MetadataKind, QuestionStore};
use crate::view::{chapter_number, curriculum_rank};

/// Group name used for questions without a publisher.
pub const UNKNOWN_PUBLISHER: &str = "Unknown";

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GroupStats {
    pub name: String,
    pub total: usize,
    pub mc: usize,
    pub text: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total: usize,
    pub publishers: Vec<GroupStats>,
    pub topics: Vec<GroupStats>,
    pub chapters: Vec<GroupStats>,
    pub concepts: Vec<GroupStats>,
    pub patterns: Vec<GroupStats>,
    /// Distinct years, newest first.
    pub years: Vec<i32>,
}

/// Counters keyed by group name, remembering first-seen order so ties keep a
/// stable position.
#[derive(Default)]
struct Tally {
    order: Vec<String>,
    groups: HashMap<String, GroupStats>,
}

impl Tally {
    fn count(&mut self, name: &str, question: &Question) {
        if !self.groups.contains_key(name) {
            self.order.push(name.to_string());
        }
        let group = self
            .groups
            .entry(name.to_string())
            .or_insert_with(|| GroupStats {
                name: name.to_string(),
                ..GroupStats::default()
            });
        group.total += 1;
        if question.question_type == QTYPE_MC {
            group.mc += 1;
        } else if question.question_type == QTYPE_TEXT {
            group.text += 1;
        }
    }

    fn into_groups(mut self) -> Vec<GroupStats> {
        self.order
            .iter()
            .filter_map(|name| self.groups.remove(name))
            .collect()
    }
}

impl Statistics {
    pub fn from_questions(questions: &[Question]) -> Self {
        let mut publishers = Tally::default();
        let mut topics = Tally::default();
        let mut chapters = Tally::default();
        let mut concepts = Tally::default();
        let mut patterns = Tally::default();
        let mut years = BTreeSet::new();

        for q in questions {
            let publisher = q.publisher.trim();
            let publisher = if publisher.is_empty() {
                UNKNOWN_PUBLISHER
            } else {
                publisher
            };
            publishers.count(publisher, q);

            for topic in &q.curriculum_classification {
                topics.count(topic, q);
            }
            for chapter in &q.chapter_classification {
                chapters.count(chapter, q);
            }
            for concept in &q.concepts {
                concepts.count(concept, q);
            }
            for pattern in &q.pattern_tags {
                patterns.count(pattern, q);
            }
            if let Some(year) = q.year {
                years.insert(year);
            }
        }

        let mut topics = topics.into_groups();
        topics.sort_by_key(|g| curriculum_rank(&g.name));

        let mut chapters = chapters.into_groups();
        chapters.sort_by_key(|g| chapter_number(&g.name).unwrap_or(u32::MAX));

        let mut concepts = concepts.into_groups();
        concepts.sort_by(|a, b| b.total.cmp(&a.total));

        let mut patterns = patterns.into_groups();
        patterns.sort_by(|a, b| b.total.cmp(&a.total));

        Statistics {
            total: questions.len(),
            publishers: publishers.into_groups(),
            topics,
            chapters,
            concepts,
            patterns,
            years: years.into_iter().rev().collect(),
        }
    }

    /// Statistics over the whole store, with the stored comments attached to
    /// their groups.
    pub fn collect(store: &QuestionStore) -> Self {
        let mut stats = Self::from_questions(store.questions());
        for (kind, groups) in [
            (MetadataKind::Publishers, &mut stats.publishers),
            (MetadataKind::Topics, &mut stats.topics),
            (MetadataKind::Concepts, &mut stats.concepts),
            (MetadataKind::Patterns, &mut stats.patterns),
        ] {
            for group in groups.iter_mut() {
                group.comment = store.comment(kind, &group.name);
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, qtype: &str) -> Question {
        let mut q = Question::new(id, "DSE");
        q.question_type = qtype.into();
        q
    }

    #[test]
    fn counts_split_by_question_type() {
        let mut a = question("1", QTYPE_MC);
        a.publisher = "HKEAA".into();
        let mut b = question("2", QTYPE_TEXT);
        b.publisher = "HKEAA".into();
        let c = question("3", QTYPE_MC);

        let stats = Statistics::from_questions(&[a, b, c]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.publishers.len(), 2);
        let hkeaa = &stats.publishers[0];
        assert_eq!((hkeaa.name.as_str(), hkeaa.total, hkeaa.mc, hkeaa.text), ("HKEAA", 2, 1, 1));
        assert_eq!(stats.publishers[1].name, UNKNOWN_PUBLISHER);
    }

    #[test]
    fn topics_follow_curriculum_order() {
        let mut a = question("1", QTYPE_MC);
        a.curriculum_classification = vec!["E1 選修單元一".into(), "C 市場與價格".into()];
        let mut b = question("2", QTYPE_MC);
        b.curriculum_classification = vec!["A 基本經濟概念".into()];

        let stats = Statistics::from_questions(&[a, b]);
        let names: Vec<&str> = stats.topics.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["A 基本經濟概念", "C 市場與價格", "E1 選修單元一"]);
    }

    #[test]
    fn chapters_numeric_and_concepts_by_total() {
        let mut a = question("1", QTYPE_MC);
        a.chapter_classification = vec!["Ch10".into(), "Ch02".into()];
        a.concepts = vec!["supply".into(), "demand".into()];
        a.year = Some(2019);
        let mut b = question("2", QTYPE_TEXT);
        b.chapter_classification = vec!["Ch02".into()];
        b.concepts = vec!["demand".into()];
        b.year = Some(2021);

        let stats = Statistics::from_questions(&[a, b]);
        let chapters: Vec<&str> = stats.chapters.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(chapters, ["Ch02", "Ch10"]);
        assert_eq!(stats.concepts[0].name, "demand");
        assert_eq!(stats.concepts[0].total, 2);
        assert_eq!(stats.years, vec![2021, 2019]);
    }
}
