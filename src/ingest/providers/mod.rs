// src/ingest/providers/mod.rs
pub mod chromium;
pub mod fixture;
