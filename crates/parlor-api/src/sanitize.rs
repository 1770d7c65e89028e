use sha2::{Digest, Sha256};

/// Colours handed out to users who don't pick one.
pub const PALETTE: [&str; 5] = ["#3366cc", "#dc3912", "#ff9900", "#109618", "#990099"];

/// Escape text for safe embedding in HTML, quotes included.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Stable palette pick for a username, so the same name keeps its colour.
pub fn default_color(username: &str) -> &'static str {
    let digest = Sha256::digest(username.as_bytes());
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    PALETTE[n as usize % PALETTE.len()]
}
