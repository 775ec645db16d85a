//! graphsaver - graph-aware persistence for SQLite
//!
//! Saves an in-memory graph of entities, reachable from one or more roots,
//! in a single transaction: new rows are inserted before the rows that
//! reference them, reference cycles are broken through nullable columns
//! that a second pass fills in, and rows of the same type are written in
//! batched statements compiled once per table and batch size.
//!
//! # Architecture
//!
//! - [`model`] - Entity arena: entities, references, embedded values, collections
//! - [`schema`] - Table layouts and the type registry
//! - [`graph`] - Reachability, integrity checks, dependency graph, cycle breaking
//! - [`sql`] - Compiled binders and batch-size keyed statements
//! - [`saver`] - The save loop, batch planner and optimistic concurrency
//! - [`driver`] - Statement execution seam and SQLite storage
//! - [`config`] - Save settings
//! - [`demo`] - A demo schema and graph
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod demo;
pub mod driver;
pub mod error;
pub mod graph;
pub mod model;
pub mod saver;
pub mod schema;
pub mod sql;

pub use config::SaveSettings;
pub use driver::{Driver, RecordingDriver, SqliteStorage};
pub use error::{Error, Result};
pub use model::{Collection, Embedded, Entity, EntityArena, FieldValue, Handle, Lite, ModifiedState, Reference, Value};
pub use saver::{SaveContext, SaveObserver, SavedEvent, VersionPolicy, save};
pub use schema::{Column, CollectionDef, FieldDef, MixinDef, Schema, SqlType, TableDef, TypeName};
