//! Non-destructive document mutation.
//!
//! ```text
//! PdfDocument (parsed, immutable)
//!     ↓
//! [PdfModification] (AddSignatureField | EmbedSignature | UpdateMetadata)
//!     ↓
//! [IncrementalUpdateGenerator]
//!     ↓
//! original bytes ++ new objects ++ xref ++ trailer
//! ```
//!
//! Bytes already in the document are never rewritten, so signatures made
//! over earlier revisions keep verifying.

mod incremental;

pub use incremental::{
    IncrementalUpdateGenerator, PdfModification, PreparedUpdate, SignaturePlaceholder,
};
