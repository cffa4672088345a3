//! # Helpdesk Triage Core
//!
//! Runtime-free logic for helpdesk-triage: ticket models, the text
//! normalizer and signature hasher, the embedding trait, the store
//! abstraction with an in-memory backend, the record writer, the two-tier
//! similarity engine, and the triage engine with its heuristic fallback.
//!
//! This crate contains no sqlx, reqwest, or other I/O dependencies. The
//! application crate supplies concrete stores, embedding providers and
//! classifiers through the traits defined here.

pub mod embedding;
pub mod index;
pub mod models;
pub mod normalize;
pub mod records;
pub mod similarity;
pub mod store;
pub mod triage;
