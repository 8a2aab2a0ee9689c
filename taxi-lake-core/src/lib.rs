#![doc = "taxi-lake-core: core logic library for taxi-lake."]

//! This crate holds the pipeline logic for moving NYC taxi trip files into object storage
//! and building warehouse tables over them. Concrete cloud clients live in the `taxi-lake`
//! CLI crate; everything here talks to them through the traits in [`contract`].
//!
//! # Usage
//! Build a [`config::PipelineConfig`], pick an [`contract::ObjectStore`] and a
//! [`contract::Fetcher`], then drive [`coordinator::UploadCoordinator`] directly or through
//! the [`synchronise`] pipelines.

pub mod bucket;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod ingest;
pub mod schema;
pub mod synchronise;
pub mod task;
pub mod warehouse;
