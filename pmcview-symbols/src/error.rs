use thiserror::Error;

/// The error type used in this crate.
///
/// Resolution failures are never fatal to a run: every error is absorbed at
/// the frame or image boundary and the affected frames become unmapped.
/// These variants exist so the absorption sites can log what happened.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Could not open image file {0}: {1}")]
    OpenImage(String, #[source] std::io::Error),

    #[error("Could not memory-map image file {0}: {1}")]
    MapImage(String, #[source] std::io::Error),

    #[error("Object could not parse the file {0}: {1}")]
    ObjectParse(String, #[source] object::read::Error),

    #[error("DWARF parse error: {0}")]
    DwarfParse(
        #[from]
        #[source]
        gimli::Error,
    ),
}
