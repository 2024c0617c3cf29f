// ABOUTME: Output generation for extracted subsets: SQL, JSON, CSV and streaming writers
// ABOUTME: Each format module is self-contained; callers pick one at the CLI layer

pub mod csv;
pub mod json;
pub mod sql;
pub mod streaming;

pub use csv::{CsvGenerator, CsvMode};
pub use json::{JsonGenerator, JsonMode};
pub use sql::SqlGenerator;
pub use streaming::{build_broken_fk_map, StreamingEmitter};
