use crate::config::CategorySpec;

/// Splits `categories` into consecutive chunks of at most `chunk_size`,
/// keeping their order. A `chunk_size` of 0 is treated as 1.
pub fn chunk_categories(categories: &[CategorySpec], chunk_size: usize) -> Vec<&[CategorySpec]> {
    categories.chunks(chunk_size.max(1)).collect()
}
