use thiserror::Error;

/// Document-level failures. These abort the whole compression call.
#[derive(Error, Debug)]
pub enum CompressError {
    #[error("Quality must be between 1 and 100")]
    InvalidQuality,

    #[error("Failed to open PDF: {0}")]
    Open(String),

    #[error("Failed to save PDF: {0}")]
    Save(String),
}

/// Per-image failures. The page loop logs these and leaves the image
/// untouched; they never abort the document pass.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to decode JPEG data: {0}")]
    Decode(String),

    #[error("Failed to decompress image stream: {0}")]
    Inflate(String),

    #[error("Pixel data too short: got {got} bytes, expected {expected} for {width}x{height}x{channels}")]
    PayloadMismatch {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
        channels: u32,
    },

    #[error("Failed to encode JPEG: {0}")]
    Encode(String),
}

/// Storage/session layer failures. The transport layer maps these onto
/// not-found / bad-request / request-too-large responses.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Only PDF files are supported")]
    InvalidUpload,

    #[error("File size {size_mb:.2} MB exceeds the {limit_mb} MB limit")]
    TooLarge { size_mb: f64, limit_mb: u64 },

    #[error("No stored file for id {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
