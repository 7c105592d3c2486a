//! Script-aware token count estimate.
//!
//! Subword tokenizers split right-to-left scripts into many more pieces per
//! character than Latin text, so those characters are weighted heavier.

/// Average characters per token for Latin and most other scripts.
const CHARS_PER_TOKEN: f64 = 4.0;
/// Average characters per token for Hebrew and Arabic.
const RTL_CHARS_PER_TOKEN: f64 = 2.0;

fn is_rtl(c: char) -> bool {
    matches!(c,
        '\u{0590}'..='\u{05FF}'   // Hebrew
        | '\u{FB1D}'..='\u{FB4F}' // Hebrew presentation forms
        | '\u{0600}'..='\u{06FF}' // Arabic
    )
}

/// Estimate how many model tokens `text` will produce.
pub fn estimate_tokens(text: &str) -> usize {
    let (rtl, other) = text.chars().fold((0usize, 0usize), |(rtl, other), c| {
        if is_rtl(c) {
            (rtl + 1, other)
        } else {
            (rtl, other + 1)
        }
    });
    (rtl as f64 / RTL_CHARS_PER_TOKEN + other as f64 / CHARS_PER_TOKEN).ceil() as usize
}
