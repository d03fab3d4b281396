// src/lib.rs

//! Unwetter: severe-weather warnings for chat subscribers, by postal code.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
