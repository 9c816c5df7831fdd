/// Largest char boundary at or below `index`.
fn floor_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}

/// Truncate prompt material if it exceeds `max_bytes`.
/// Cuts at a char boundary and appends a marker showing original vs kept size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let boundary = floor_boundary(output, max_bytes);
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        assert_eq!(truncate_output("hello world", 1024), "hello world");
        assert_eq!(truncate_output("", 10), "");
    }

    #[test]
    fn truncates_at_limit() {
        let input = "a".repeat(1000);
        let result = truncate_output(&input, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.ends_with("[truncated: 1000 bytes -> 100 bytes]"));
    }

    #[test]
    fn truncates_at_char_boundary() {
        // "é" is two bytes; byte 5 falls inside the third one.
        let input = "é".repeat(10);
        let result = truncate_output(&input, 5);
        assert!(result.starts_with("éé\n"));
        assert!(result.contains("-> 4 bytes]"));
    }
}
