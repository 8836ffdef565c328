//! Low-level PDF writing.
//!
//! ```text
//! PdfModification[]
//!     ↓
//! [IncrementalUpdateGenerator] (editor)
//!     ↓
//! [AppearanceStreamBuilder] (signature widget Form XObjects)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! appended bytes
//! ```

mod appearance_stream;
mod object_serializer;

pub use appearance_stream::{signature_lines, text_width, AppearanceStreamBuilder};
pub use object_serializer::{format_number, hex_upper, ObjectSerializer};
