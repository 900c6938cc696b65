mod text;

pub use text::{format_size, sanitize_title};
