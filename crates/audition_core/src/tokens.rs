//! Token estimation for admission control.

/// Rough token estimate: four bytes per token, never zero.
///
/// Used only to charge the tokens-per-minute budget before submission.
///
/// # Examples
///
/// ```
/// use audition_core::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 1);
/// assert_eq!(estimate_tokens("abcdefgh"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.len() / 4) as u64).max(1)
}
