//! HTTP request handlers for the multidim API.

pub mod common;
pub mod dataset;
pub mod health;
