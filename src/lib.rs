//! # Helpdesk Triage
//!
//! Polls a helpdesk for active tickets, classifies each one, stores it with
//! a normalized text signature and an embedding, and answers "what have we
//! seen like this before?" on demand.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ Helpdesk │──▶│  Poller  │──▶│ Triage +     │──▶│  SQLite  │
//! │ (Zoho)   │◀──│          │   │ Record write │   │ + LSH    │
//! └──────────┘   └────┬─────┘   └──────────────┘   └────┬─────┘
//!   note/priority     │ email                           │
//!                     ▼                     ┌───────────┤
//!                ┌──────────┐               ▼           ▼
//!                │  Relay   │          ┌────────┐  ┌──────────┐
//!                └──────────┘          │  CLI   │  │   HTTP   │
//!                                      └────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! htriage init                    # create database
//! htriage poll --once             # run one triage cycle
//! htriage similar 1234            # tickets similar to #1234
//! htriage serve                   # operator HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite ticket store with LSH buckets |
//! | [`embedding`] | Local and Ollama embedding providers |
//! | [`classifier`] | Anthropic Messages API classifier |
//! | [`helpdesk`] | Zoho Desk client |
//! | [`notify`] | Notification email via mail relay |
//! | [`poller`] | Poll worker |
//! | [`similar`] | `similar` command |
//! | [`triage_cmd`] | Triage engine wiring, `triage` command |
//! | [`desk_cmd`] | `helpdesk` commands |
//! | [`server`] | Operator HTTP API |
//!
//! The runtime-free pieces (normalization, signatures, similarity, triage)
//! live in the `helpdesk-triage-core` crate.

pub mod classifier;
pub mod config;
pub mod db;
pub mod desk_cmd;
pub mod embedding;
pub mod helpdesk;
pub mod migrate;
pub mod notify;
pub mod poller;
pub mod server;
pub mod similar;
pub mod sqlite_store;
pub mod triage_cmd;
