//! Record import from files.
//!
//! External catalog, customer and behaviour feeds arrive as NDJSON.

pub mod ndjson;

// Re-export commonly used types and functions
pub use ndjson::{
    import_behaviors, import_products, import_profiles, parse_ndjson_file_generic, ImportError,
    ProfileImport,
};
