use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

/// First `max_chars` characters of `input`, cut on a char boundary.
pub fn prefix_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Last `max_chars` characters of `input`, cut on a char boundary.
pub fn suffix_chars(input: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match input.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &input[idx..],
        None => input,
    }
}

/// Keep the beginning and end of an over-long text around `marker`, so that
/// neither early nor late content is favoured.
pub fn keep_head_and_tail(input: &str, max_chars: usize, marker: &str) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let half = max_chars / 2;
    format!(
        "{}{marker}{}",
        prefix_chars(input, half),
        suffix_chars(input, half)
    )
}

pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KIB * KIB {
        format!("{:.2} MB", value / (KIB * KIB))
    } else if value >= KIB {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}
