//! Output generation.
//!
//! # Submodules
//!
//! - [`json`]: Merges new `ContentUnit`s into the content-unit JSON file that
//!   the downstream synthesis stage consumes
//!
//! # Output Structure
//!
//! ```text
//! data/
//! ├── corpus.json          # GUID -> RawItem, owned by the corpus store
//! └── content_units.json   # unit id -> ContentUnit, merged each cycle
//! ```

pub mod json;
