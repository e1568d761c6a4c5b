//! # paperscan — batch PDF analyzer
//!
//! Sends research papers to Google Gemini, asks for Business Model Canvas
//! attributes as JSON, and writes one row per paper to a CSV file (plus an
//! optional JSON dump). Model output is repaired, reconciled against the
//! configured question set, and merged across chunks before it is written.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, environment overrides, validation
//! - **[`schema`]** — Questions, output columns and prompt templates
//! - **[`response`]** — JSON repair, schema reconciliation, chunk merge
//! - **[`document`]** — PDF discovery, text extraction, chunking
//! - **[`provider`]** — Remote AI backend trait, Gemini REST client, scripted mock
//! - **[`output`]** — CSV append sink and JSON writer
//! - **[`pipeline`]** — Per-document analysis and the batch loop
//! - **[`stats`]** — Summaries over a finished result CSV

pub mod config;
pub mod document;
pub mod output;
pub mod pipeline;
pub mod provider;
pub mod response;
pub mod schema;
pub mod stats;
