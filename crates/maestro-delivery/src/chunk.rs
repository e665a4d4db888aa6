//! Splitting long texts into transport-sized chunks.

/// Splits `text` into pieces of at most `max_len` bytes, preferring to
/// cut after a newline, then after a space, then at the hard limit.
/// Concatenating the pieces reproduces `text` exactly; nothing is
/// dropped or truncated. Cuts always land on char boundaries.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let mut window_end = max_len;
        while !rest.is_char_boundary(window_end) {
            window_end -= 1;
        }
        if window_end == 0 {
            // The limit is smaller than the next char; emit it alone
            // rather than looping forever.
            let first = rest.chars().next().map_or(rest.len(), char::len_utf8);
            chunks.push(rest[..first].to_string());
            rest = &rest[first..];
            continue;
        }
        let window = &rest[..window_end];
        // Cut after the separator so the rejoined chunks are identical
        // to the input.
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|i| i + 1)
            .filter(|&i| i > 1)
            .unwrap_or(window_end);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
