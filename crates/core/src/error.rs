#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Grid overflow: {count} items do not fit a {rows}x{cols} layout")]
    GridOverflow { count: usize, rows: u32, cols: u32 },
}
