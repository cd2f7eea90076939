//! The contract every document stored in a catalog index fulfils.

/// JSON field names shared by every catalog document.
pub mod fields {
    /// Document identifier (the precise entity identifier for versioned entities).
    pub const DOC_ID: &str = "docId";
    /// Logical document type, used to restrict searches to some kinds of documents.
    pub const TYPE: &str = "type";
    /// Virtual (latest-version) identifier of a versioned entity.
    pub const VIRTUAL_ID: &str = "virtualId";
    /// Whether a versioned entity is the latest version.
    pub const LAST: &str = "last";
    /// Entity identifiers a document is tagged with.
    pub const TAGS: &str = "tags";
    /// Default geometry field, mapped as a geo shape.
    pub const GEOMETRY: &str = "geometry";
    /// Data files of a document, grouped by file type.
    pub const FILES: &str = "files";
    /// Suffix of the not-analyzed sibling of a text field.
    pub const KEYWORD_SUFFIX: &str = ".keyword";
}

/// A document that can be saved into a catalog index.
///
/// Implementors must serialize their identifier under [`fields::DOC_ID`] and
/// their type under [`fields::TYPE`] so that searches by key and type filters
/// see the same values as [`Indexable::doc_id`] and [`Indexable::doc_type`].
pub trait Indexable {
    /// Unique identifier of the document inside its index. Must not be empty.
    fn doc_id(&self) -> &str;

    /// Logical type of the document. Must not be empty.
    fn doc_type(&self) -> &str;

    /// Ingestion session the document belongs to, if any.
    fn session(&self) -> Option<&str> {
        None
    }

    /// Owner (source) of the ingestion session, if any.
    fn session_owner(&self) -> Option<&str> {
        None
    }
}
