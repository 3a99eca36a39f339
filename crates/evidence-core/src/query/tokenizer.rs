//! Token estimation and budget truncation.

use serde::{Deserialize, Serialize};

const CHARS_PER_TOKEN: f64 = 3.5;
const ELLIPSIS: &str = "...";

pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / CHARS_PER_TOKEN).max(1.0) as usize
}

/// Which part of an over-budget text is dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropMode {
    Head,
    Middle,
    #[default]
    Tail,
}

/// Fit `text` into `max_tokens`, marking the cut with `...`.
pub fn truncate_tokens(text: &str, max_tokens: usize, mode: DropMode) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let max_chars = (max_tokens as f64 * CHARS_PER_TOKEN) as usize;
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    if keep == 0 {
        return ELLIPSIS.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    match mode {
        DropMode::Tail => {
            let head: String = chars[..keep].iter().collect();
            format!("{head}{ELLIPSIS}")
        }
        DropMode::Head => {
            let tail: String = chars[chars.len() - keep..].iter().collect();
            format!("{ELLIPSIS}{tail}")
        }
        DropMode::Middle => {
            let front = keep / 2;
            let back = keep - front;
            let head: String = chars[..front].iter().collect();
            let tail: String = chars[chars.len() - back..].iter().collect();
            format!("{head}{ELLIPSIS}{tail}")
        }
    }
}
