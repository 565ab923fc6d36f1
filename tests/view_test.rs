use exambank::model::Question;
use exambank::view::{PageSize, SortKey, paginate, sort};

fn numbered(n: usize) -> Vec<Question> {
    (1..=n)
        .map(|i| Question::new(format!("Q{i:02}"), "DSE"))
        .collect()
}

fn ids(records: &[Question]) -> Vec<&str> {
    records.iter().map(|q| q.id.as_str()).collect()
}

#[test]
fn unlimited_page_returns_everything() {
    let records = numbered(45);
    let page = paginate(records.clone(), 3, PageSize::from_wire(-1));
    assert_eq!(page.items, records);
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.page, 1);
}

#[test]
fn pages_slice_in_order() {
    let page = paginate(numbered(45), 3, PageSize::Limited(20));
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.total_items, 45);
    assert_eq!(ids(&page.items), ["Q41", "Q42", "Q43", "Q44", "Q45"]);
}

#[test]
fn out_of_range_pages_are_clamped() {
    let page = paginate(numbered(25), 9, PageSize::Limited(10));
    assert_eq!(page.page, 3);
    assert_eq!(page.items.len(), 5);

    let page = paginate(numbered(25), 0, PageSize::Limited(10));
    assert_eq!(page.page, 1);
    assert_eq!(page.items[0].id, "Q01");
}

#[test]
fn empty_list_has_one_empty_page() {
    let page = paginate(Vec::<Question>::new(), 1, PageSize::default());
    assert_eq!(page.total_pages, 1);
    assert!(page.items.is_empty());
}

#[test]
fn curriculum_sort_uses_earliest_code() {
    let mut a = Question::new("a", "DSE");
    a.curriculum_classification = vec!["E2 選修單元二".into()];
    let mut b = Question::new("b", "DSE");
    b.curriculum_classification = vec!["J 國際貿易和金融".into(), "B 廠商與生產".into()];
    let c = Question::new("c", "DSE");
    let mut d = Question::new("d", "DSE");
    d.curriculum_classification = vec!["E".into()];

    let sorted = sort(vec![a, b, c, d], SortKey::Curriculum);
    assert_eq!(ids(&sorted), ["b", "d", "a", "c"]);
}

#[test]
fn chapter_sort_is_numeric() {
    let mut a = Question::new("a", "DSE");
    a.chapter_classification = vec!["Ch10".into()];
    let mut b = Question::new("b", "DSE");
    b.chapter_classification = vec!["Ch09".into(), "Ch02".into()];
    let c = Question::new("c", "DSE");

    let sorted = sort(vec![c, a, b], SortKey::Chapter);
    assert_eq!(ids(&sorted), ["b", "a", "c"]);
}

#[test]
fn year_sort_puts_newest_first_and_missing_last() {
    let mut a = Question::new("a", "DSE");
    a.year = Some(2012);
    let b = Question::new("b", "DSE");
    let mut c = Question::new("c", "DSE");
    c.year = Some(2023);

    let sorted = sort(vec![a, b, c], SortKey::YearDesc);
    assert_eq!(ids(&sorted), ["c", "a", "b"]);
}

#[test]
fn insertion_sort_keeps_order() {
    let records = numbered(5);
    let mut reversed = records.clone();
    reversed.reverse();
    assert_eq!(sort(reversed.clone(), SortKey::Insertion), reversed);
    assert_eq!(sort(reversed, SortKey::Id), records);
}
