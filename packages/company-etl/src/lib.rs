//! Australian company discovery and business-register matching.
//!
//! Finds company websites in the Common Crawl archive, reads the ABR bulk
//! extract, and asks a language model which website belongs to which
//! registered entity. Confirmed pairs land in Postgres.
//!
//! # Stages
//!
//! ```text
//! crawl:    index -> byte-range fetch -> WARC decode -> fields -> dedup -> commoncrawl.json
//! registry: abr.zip / extracted_xml -> streaming XML walk -> abr_data.json
//! match:    commoncrawl.json x abr_data.json -> classifier -> matched_data.json
//! persist:  matched_data.json -> matched_companies
//! ```
//!
//! Every stage is a function in [`pipeline`] taking a [`Config`]; the
//! `company-etl` binary exposes one subcommand per stage.
//!
//! # Usage
//!
//! ```rust,ignore
//! use company_etl::{pipeline, Config};
//!
//! let config = Config::from_env()?;
//! pipeline::crawl_stage(&config).await?;
//! pipeline::registry_stage(&config).await?;
//! ```
//!
//! # Modules
//!
//! - [`locator`] - Crawl index queries
//! - [`archive`] / [`warc`] - Byte-range fetch and WARC decoding
//! - [`fields`] / [`dedup`] - Company fields from HTML, one record per site
//! - [`registry`] - Streaming ABR extract reader
//! - [`classifier`] / [`matcher`] - Same-entity decisions
//! - [`artifacts`] / [`sink`] - Stage hand-off files and Postgres persistence
//! - [`testing`] - Mock classifier

pub mod archive;
pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod error;
pub mod fields;
pub mod locator;
pub mod matcher;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod testing;
pub mod types;
pub mod warc;

pub use archive::{root_url, RecordExtractor};
pub use classifier::{Classifier, GeminiClassifier};
pub use config::Config;
pub use dedup::CrawlDeduplicator;
pub use error::{PipelineError, Result, WarcError};
pub use locator::{ArchiveLocator, LocateOutcome};
pub use matcher::{MatchOutcome, MatchStats, Matcher};
pub use registry::{EntryVisitor, RegistryCollector, RegistryEntry, RegistrySource};
pub use sink::{persist_all, MatchSink, MemorySink, PersistStats, PostgresSink};
pub use types::{CompanyRecord, CrawlCandidate, MatchResult, PageCapture, RegistryRecord};
