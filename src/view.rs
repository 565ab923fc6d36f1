use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::model::Question;

lazy_static! {
    static ref CURRICULUM_CODE_REGEX: Regex = Regex::new(r"^([A-J]|E[12])(?:\s|$)").unwrap();
    static ref LEADING_INT_REGEX: Regex = Regex::new(r"\d+").unwrap();
}

/// Curriculum codes in syllabus order.
pub const CURRICULUM_ORDER: [&str; 12] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "E1", "E2",
];

/// Full display names of the curriculum codes.
pub const CURRICULUM_NAMES: [(&str, &str); 12] = [
    ("A", "A 基本經濟概念"),
    ("B", "B 廠商與生產"),
    ("C", "C 市場與價格"),
    ("D", "D 競爭與市場結構"),
    ("E", "E 效率、公平和政府的角色"),
    ("F", "F 經濟表現的量度"),
    ("G", "G 國民收入決定及價格水平"),
    ("H", "H 貨幣與銀行"),
    ("I", "I 宏觀經濟問題和政府"),
    ("J", "J 國際貿易和金融"),
    ("E1", "E1 選修單元一"),
    ("E2", "E2 選修單元二"),
];

/// Prefix carried by stored chapter tags (`Ch05`).
pub const CHAPTER_PREFIX: &str = "Ch";

/// Curriculum code of a tag, accepting either the bare code ("E1") or the
/// full name ("E1 選修單元一").
pub fn curriculum_code(tag: &str) -> Option<&str> {
    CURRICULUM_CODE_REGEX
        .captures(tag.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Position of a tag in the syllabus; unknown tags sort after every known one.
pub fn curriculum_rank(tag: &str) -> usize {
    curriculum_code(tag)
        .and_then(|code| CURRICULUM_ORDER.iter().position(|c| *c == code))
        .unwrap_or(CURRICULUM_ORDER.len())
}

/// First integer appearing in a chapter tag (`Ch05` → 5).
pub fn chapter_number(tag: &str) -> Option<u32> {
    LEADING_INT_REGEX
        .find(tag)
        .and_then(|m| m.as_str().parse().ok())
}

/// Stored form of a chapter selected by number: `5` and `05` both become
/// `Ch05`. Non-numeric input is only prefixed.
pub fn chapter_tag(number: &str) -> String {
    let number = number.trim();
    match number.parse::<u32>() {
        Ok(n) => format!("{CHAPTER_PREFIX}{n:02}"),
        Err(_) => format!("{CHAPTER_PREFIX}{number}"),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    /// Order in which records were stored.
    #[default]
    Insertion,
    /// Syllabus order of the record's earliest curriculum code.
    Curriculum,
    /// Numeric order of the record's lowest chapter.
    Chapter,
    /// Newest year first.
    YearDesc,
    Id,
}

impl SortKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "insertion" | "default" => Some(SortKey::Insertion),
            "curriculum" => Some(SortKey::Curriculum),
            "chapter" => Some(SortKey::Chapter),
            "year" | "yeardesc" => Some(SortKey::YearDesc),
            "id" => Some(SortKey::Id),
            _ => None,
        }
    }
}

/// Stable sort; records without a sort value go last.
pub fn sort(mut records: Vec<Question>, key: SortKey) -> Vec<Question> {
    match key {
        SortKey::Insertion => {}
        SortKey::Curriculum => records.sort_by_key(|q| {
            q.curriculum_classification
                .iter()
                .map(|t| curriculum_rank(t))
                .min()
                .unwrap_or(CURRICULUM_ORDER.len())
        }),
        SortKey::Chapter => records.sort_by(|a, b| {
            compare_missing_last(lowest_chapter(a), lowest_chapter(b))
        }),
        SortKey::YearDesc => records.sort_by(|a, b| match (a.year, b.year) {
            (Some(x), Some(y)) => y.cmp(&x),
            (x, y) => compare_missing_last(x, y),
        }),
        SortKey::Id => records.sort_by(|a, b| a.id.cmp(&b.id)),
    }
    records
}

fn lowest_chapter(q: &Question) -> Option<u32> {
    q.chapter_classification
        .iter()
        .filter_map(|t| chapter_number(t))
        .min()
}

fn compare_missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Page size; `-1` on the wire means everything on one page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageSize {
    Limited(usize),
    Unlimited,
}

pub const DEFAULT_PAGE_SIZE: PageSize = PageSize::Limited(20);

impl PageSize {
    pub fn from_wire(value: i64) -> Self {
        if value <= 0 {
            PageSize::Unlimited
        } else {
            PageSize::Limited(value as usize)
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            PageSize::Limited(n) => n as i64,
            PageSize::Unlimited => -1,
        }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        DEFAULT_PAGE_SIZE
    }
}

impl Serialize for PageSize {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_wire())
    }
}

impl<'de> Deserialize<'de> for PageSize {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(PageSize::from_wire)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page actually returned, after clamping.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub page_size: PageSize,
}

/// Slice `records` into pages. Page numbers start at 1; a page past either
/// end is clamped to the nearest valid page.
pub fn paginate<T>(records: Vec<T>, page: usize, size: PageSize) -> Page<T> {
    let total_items = records.len();
    match size {
        PageSize::Unlimited | PageSize::Limited(0) => Page {
            items: records,
            page: 1,
            total_pages: 1,
            total_items,
            page_size: size,
        },
        PageSize::Limited(per_page) => {
            let total_pages = total_items.div_ceil(per_page).max(1);
            let page = page.clamp(1, total_pages);
            let items = records
                .into_iter()
                .skip((page - 1) * per_page)
                .take(per_page)
                .collect();
            Page {
                items,
                page,
                total_pages,
                total_items,
                page_size: size,
            }
        }
    }
}
