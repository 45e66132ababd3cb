pub mod config;
pub mod pipeline;

pub use pipeline::{DocumentOutcome, ImportReport, Importer};
