//! In-memory object graph.
//!
//! This module contains the entity model the engine persists:
//! - [`EntityArena`] / [`Handle`] - arena of entities addressed by index
//! - [`Entity`] - one persistent unit with fields, mixins and collections
//! - [`FieldValue`], [`Reference`], [`Lite`], [`Embedded`] - field contents
//! - [`Collection`] - child rows stored in a separate table
//! - [`Value`] - scalar column values

pub mod arena;
pub mod collection;
pub mod entity;
pub mod value;

pub use arena::{EntityArena, Handle};
pub use collection::{Collection, CollectionRow};
pub use entity::{Embedded, Entity, FieldValue, Lite, ModifiedState, Reference};
pub use value::Value;
