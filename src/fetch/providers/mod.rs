// src/fetch/providers/mod.rs
pub mod github;
pub mod web;
