use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::warn;

use exambank::config::AppConfig;
use exambank::filter::{
    Feature, FilterSpec, MARKS_BOUNDS, PERCENTAGE_BOUNDS, RangeFilter, RangeSelection, TagFilter,
};
use exambank::model::Question;
use exambank::stats::{GroupStats, Statistics};
use exambank::store::{MetadataKind, QuestionStore};
use exambank::sync::{Anomaly, SheetSync};
use exambank::view::{self, PageSize, SortKey};

#[derive(Parser)]
#[command(name = "exambank", version, about = "Economics exam question bank")]
struct Cli {
    /// Config file (defaults to $EXAMBANK_CONFIG or exambank.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store file, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace the local store with the questions from the sheet
    Sync {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        username: Option<String>,
    },
    /// List questions matching the given filters
    List(ListArgs),
    /// Print one question in full
    Show { id: String },
    /// Delete one question
    Delete { id: String },
    /// Delete every question and comment
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Write the store as JSON to a file or stdout
    Export { path: Option<PathBuf> },
    /// Replace the store with an exported JSON document
    Import { path: PathBuf },
    /// Show counts by publisher, topic, chapter, concept and pattern
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Read or set the comment on a publisher, topic, concept or pattern
    Comment {
        #[arg(value_parser = parse_kind)]
        kind: MetadataKind,
        name: String,
        text: Option<String>,
    },
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    exam: Option<String>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    qtype: Option<String>,
    #[arg(long)]
    curriculum: Vec<String>,
    #[arg(long)]
    exclude_curriculum: Vec<String>,
    #[arg(long)]
    chapter: Vec<String>,
    #[arg(long)]
    exclude_chapter: Vec<String>,
    #[arg(long, value_parser = parse_feature)]
    feature: Vec<Feature>,
    #[arg(long, value_parser = parse_feature)]
    exclude_feature: Vec<Feature>,
    #[arg(long)]
    min_pct: Option<f64>,
    #[arg(long)]
    max_pct: Option<f64>,
    #[arg(long)]
    min_marks: Option<f64>,
    #[arg(long)]
    max_marks: Option<f64>,
    #[arg(long, value_parser = parse_sort, default_value = "insertion")]
    sort: SortKey,
    #[arg(long, default_value_t = 1)]
    page: usize,
    /// Questions per page; -1 shows everything
    #[arg(long, default_value_t = 20, allow_hyphen_values = true)]
    page_size: i64,
    /// Print the page as JSON
    #[arg(long)]
    json: bool,
}

fn parse_kind(value: &str) -> Result<MetadataKind, String> {
    MetadataKind::parse(value)
        .ok_or_else(|| format!("expected publishers, topics, concepts or patterns, got `{value}`"))
}

fn parse_feature(value: &str) -> Result<Feature, String> {
    Feature::parse(value)
        .ok_or_else(|| format!("expected graph, table, calculation or multiple, got `{value}`"))
}

fn parse_sort(value: &str) -> Result<SortKey, String> {
    SortKey::parse(value)
        .ok_or_else(|| format!("expected insertion, curriculum, chapter, year or id, got `{value}`"))
}

impl ListArgs {
    fn filter_spec(&self) -> FilterSpec {
        let mut curriculum = TagFilter::new();
        for tag in &self.curriculum {
            curriculum = curriculum.include(tag.clone());
        }
        for tag in &self.exclude_curriculum {
            curriculum = curriculum.exclude(tag.clone());
        }

        let mut chapter = TagFilter::new();
        for number in &self.chapter {
            chapter = chapter.include(number.clone());
        }
        for number in &self.exclude_chapter {
            chapter = chapter.exclude(number.clone());
        }

        let mut features = TagFilter::new();
        for feature in &self.feature {
            features = features.include(*feature);
        }
        for feature in &self.exclude_feature {
            features = features.exclude(*feature);
        }

        FilterSpec {
            search: self.search.clone(),
            examination: self.exam.clone(),
            year: self.year,
            question_type: self.qtype.clone(),
            correct_percentage: RangeFilter::from_selection(
                PERCENTAGE_BOUNDS,
                RangeSelection {
                    min: self.min_pct,
                    max: self.max_pct,
                },
            ),
            marks: RangeFilter::from_selection(
                MARKS_BOUNDS,
                RangeSelection {
                    min: self.min_marks,
                    max: self.max_marks,
                },
            ),
            curriculum,
            chapter,
            features,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    exambank::init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => AppConfig::load()?,
    };
    if let Some(db) = cli.db {
        config.database = db;
    }

    let mut store = QuestionStore::open(&config.database)?;

    match cli.command {
        Command::Sync { url, username } => {
            let mut sync_config = config.sync.clone();
            if url.is_some() {
                sync_config.url = url;
            }
            if username.is_some() {
                sync_config.username = username;
            }
            let mut sheet_sync = SheetSync::from_config(&sync_config)?;
            let report = sheet_sync.sync(&mut store).await?;

            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            for anomaly in &report.anomalies {
                match anomaly {
                    Anomaly::RowInvalid {
                        row,
                        examination,
                        id,
                    } => println!(
                        "skipped row {row}: examination \"{examination}\", id \"{id}\""
                    ),
                    Anomaly::InsertFailed { id, reason } => {
                        println!("not stored {id}: {reason}")
                    }
                }
            }
            if report.applied {
                println!(
                    "Imported {} questions ({} rows skipped)",
                    report.imported, report.skipped_rows
                );
            } else {
                println!("No valid questions in the sheet; local store left unchanged");
            }
        }
        Command::List(args) => {
            let spec = args.filter_spec();
            let records = view::sort(store.get_all(Some(&spec)), args.sort);
            let page = view::paginate(records, args.page, PageSize::from_wire(args.page_size));
            if args.json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                for q in &page.items {
                    println!("{}", summary_line(q));
                }
                println!(
                    "page {}/{} ({} questions)",
                    page.page, page.total_pages, page.total_items
                );
            }
        }
        Command::Show { id } => match store.get(&id) {
            Some(q) => println!("{}", serde_json::to_string_pretty(q)?),
            None => return Err(format!("no question with id `{id}`").into()),
        },
        Command::Delete { id } => {
            if store.delete(&id)? {
                println!("Deleted {id}");
            } else {
                warn!("no question with id `{id}`");
            }
        }
        Command::Clear { yes } => {
            if !yes {
                return Err("refusing to clear the store without --yes".into());
            }
            store.clear()?;
            println!("Store cleared");
        }
        Command::Export { path } => {
            let json = store.export_json()?;
            match path {
                Some(path) => {
                    fs::write(&path, json)?;
                    println!("Exported {} questions to {}", store.len(), path.display());
                }
                None => println!("{json}"),
            }
        }
        Command::Import { path } => {
            let text = fs::read_to_string(&path)?;
            let imported = store.import_json(&text)?;
            println!("Imported {imported} questions from {}", path.display());
        }
        Command::Stats { json } => {
            let stats = Statistics::collect(&store);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
                if let Some(at) = store.last_sync() {
                    println!("Last sync: {at}");
                }
            }
        }
        Command::Comment { kind, name, text } => match text {
            Some(text) => {
                store.set_comment(kind, &name, &text)?;
                println!("Saved comment for {} `{name}`", kind.as_str());
            }
            None => println!("{}", store.comment(kind, &name)),
        },
    }

    Ok(())
}

fn summary_line(q: &Question) -> String {
    let year = q.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string());
    let text = if q.question_text_chi.is_empty() {
        &q.question_text_eng
    } else {
        &q.question_text_chi
    };
    let first_line: String = text.lines().next().unwrap_or("").chars().take(60).collect();
    format!(
        "{:<16} {:<8} {:<6} {:<4} {}",
        q.id, q.examination, year, q.question_type, first_line
    )
}

fn print_stats(stats: &Statistics) {
    println!("{} questions", stats.total);
    for (title, groups) in [
        ("Publishers", &stats.publishers),
        ("Topics", &stats.topics),
        ("Chapters", &stats.chapters),
        ("Concepts", &stats.concepts),
        ("Patterns", &stats.patterns),
    ] {
        println!("\n{title}");
        if groups.is_empty() {
            println!("  (none)");
        }
        for group in groups {
            print_group(group);
        }
    }
    let years: Vec<String> = stats.years.iter().map(|y| y.to_string()).collect();
    println!("\nYears: {}", years.join(", "));
}

fn print_group(group: &GroupStats) {
    print!(
        "  {:<32} total {:>4}  MC {:>4}  text {:>4}",
        group.name, group.total, group.mc, group.text
    );
    if group.comment.is_empty() {
        println!();
    } else {
        println!("  # {}", group.comment);
    }
}
