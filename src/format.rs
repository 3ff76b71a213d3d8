//! Small display helpers for log lines and transcript notes

/// Shorten a wallet address for logs: `0x1234...abcd`, or `none`.
pub fn mask_address(address: Option<&str>) -> String {
    match address {
        None | Some("") => "none".to_string(),
        Some(addr) => {
            let chars: Vec<char> = addr.chars().collect();
            if chars.len() <= 10 {
                return addr.to_string();
            }
            let head: String = chars[..6].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Compact number rendering: `1.23M`, `4.56k`, `7.00`.
pub fn format_number(num: f64) -> String {
    if num >= 1_000_000.0 {
        format!("{:.2}M", num / 1_000_000.0)
    } else if num >= 1_000.0 {
        format!("{:.2}k", num / 1_000.0)
    } else {
        format!("{num:.2}")
    }
}
