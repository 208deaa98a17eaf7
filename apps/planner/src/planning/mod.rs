//! Plan generation: prompt construction, AI response repair and the
//! per-unit orchestration that turns documents into spreadsheets.

pub mod generator;
pub mod handlers;
pub mod models;
pub mod parser;
pub mod prompts;
