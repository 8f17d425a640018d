//! Offline lesson curation: near-duplicate clustering of candidate lessons,
//! an embedding index over the curated set, and next-lesson sampling from a
//! reader's bookmarks.

pub mod cluster;
pub mod config;
pub mod embed;
pub mod error;
pub mod index;
pub mod lesson_units;
pub mod lessons;
pub mod recommend;
pub mod store;
pub mod verse_map;
