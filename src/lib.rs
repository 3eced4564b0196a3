//! atacquire - procurement-minutes acquisition from the PNCP portal.
//!
//! Crawls the portal's search results for a term, then downloads every file
//! attached to each discovered record into a local archive, keeping a
//! resumable progress file and a plain-text audit log alongside the files.

pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod scrapers;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
