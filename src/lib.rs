/*!
# Economics Exam Question Bank

A local catalogue of economics exam questions, kept in sync with a
spreadsheet-backed remote endpoint and browsed through filtering, sorting and
pagination.

## Overview

Question data lives in a shared spreadsheet. A remote endpoint exports the
sheet as delimited text; this crate pulls that export, validates and coerces
every row, and replaces a local database with the result. Everything else
(searching, tag filters, statistics, manual edits) works on the local copy.

## Architecture

```text
Local Record Store → Remote Sync Adapter → Filter Engine → Sort/Paginate → CLI / JSON API
```

### Data Layer
- **model**: the [`Question`] record, the `"-"` sentinel and form drafts
- **store**: [`QuestionStore`], an id-keyed table persisted with Gzip
  compression and bincode serialization, plus name-keyed comment tables

### Sync Layer
- **sync**: header mapping, typed cell coercion, row validation and the
  clear-and-replace import. Rows are separated by U+001F and fields by U+001E.

### Query Layer
- **filter**: [`FilterSpec`], a pure predicate over records with text search,
  exact matches, numeric ranges and tri-state tag filters
- **view**: curriculum/chapter ordering and page slicing
- **stats**: per-publisher, topic, chapter, concept and pattern counters

### Surfaces
- `exambank` command line client (sync, list, export, import, ...)
- `exambank-web` JSON API server (feature `web`)

## Persistence

- Store file: `database/questions.bin.gz` by default
- Export/import: pretty JSON `{version, exportDate, questions, metadata}`

## Configuration

`exambank.json` (or the file named by `EXAMBANK_CONFIG`), overridden by
`EXAMBANK_DB`, `EXAMBANK_SYNC_URL` and `EXAMBANK_BIND`. Logging follows
`RUST_LOG`.
*/

pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod stats;
pub mod store;
pub mod sync;
pub mod view;

#[cfg(feature = "web")]
pub mod app;

pub use config::{AppConfig, SyncConfig};
pub use error::{ConfigError, StoreError, SyncError};
pub use filter::{Feature, FilterSpec, RangeFilter, RangeSelection, TagFilter, TriState};
pub use model::{Question, QuestionDraft};
pub use stats::Statistics;
pub use store::{MetadataKind, QuestionStore};
pub use sync::{Anomaly, SheetSync, SyncReport};
pub use view::{Page, PageSize, SortKey};

/// Initialize `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
