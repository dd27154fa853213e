//! Strict decoding of line-delimited result streams.
//!
//! Result bodies are read as raw bytes and decoded line by line as UTF-8.
//! Nothing here guesses an encoding: a line that is not valid UTF-8, or
//! whose generated text looks like UTF-8 that was read as Latin-1/CP1252,
//! becomes [`ResultOutcome::Invalid`] so the attempt stays pending and can
//! be re-fetched.

use audition_core::{BatchResult, ResultOutcome};
use tracing::warn;

/// Byte sequences produced when UTF-8 punctuation and accents are decoded
/// as CP1252 and re-encoded.
const MOJIBAKE_MARKERS: &[&str] = &[
    "\u{e2}\u{20ac}\u{2122}", // ’
    "\u{e2}\u{20ac}\u{153}",  // “
    "\u{e2}\u{20ac}\u{9d}",   // ”
    "\u{e2}\u{20ac}\u{201c}", // en dash
    "\u{e2}\u{20ac}\u{201d}", // em dash
    "\u{e2}\u{20ac}\u{a6}",   // …
    "\u{c3}\u{a9}",           // é
    "\u{c3}\u{a8}",           // è
    "\u{c3}\u{b6}",           // ö
    "\u{c3}\u{bc}",           // ü
    "\u{c3}\u{b1}",           // ñ
    "\u{c2}\u{a0}",           // nbsp
];

/// Why generated text cannot be accepted, if it cannot.
pub(crate) fn content_defect(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return Some("empty content in succeeded result".to_string());
    }
    MOJIBAKE_MARKERS
        .iter()
        .find(|marker| text.contains(*marker))
        .map(|marker| format!("mis-decoded text (found {:?})", marker))
}

fn recover_custom_id(line: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("custom_id")?
        .as_str()
        .map(str::to_string)
}

/// Decode a result stream, delegating each well-formed line to `parse_line`.
///
/// Lines that fail to decode or parse are reported as `Invalid` when their
/// custom id can still be recovered, and logged and skipped otherwise.
/// Succeeded results are checked for empty or mis-decoded content.
pub(crate) fn parse_result_stream<F>(bytes: &[u8], batch_id: &str, parse_line: F) -> Vec<BatchResult>
where
    F: Fn(&str) -> Result<BatchResult, String>,
{
    let mut results = Vec::new();

    for raw in bytes.split(|b| *b == b'\n') {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                let lossy = String::from_utf8_lossy(raw);
                let reason = format!("result line is not valid UTF-8: {}", e);
                match recover_custom_id(&lossy) {
                    Some(custom_id) => {
                        warn!(batch_id, custom_id = %custom_id, %reason, "Undecodable result line");
                        results.push(BatchResult {
                            custom_id,
                            outcome: ResultOutcome::Invalid { reason },
                        });
                    }
                    None => warn!(batch_id, %reason, "Undecodable result line without custom id"),
                }
                continue;
            }
        };

        let result = match parse_line(line) {
            Ok(result) => result,
            Err(reason) => {
                match recover_custom_id(line) {
                    Some(custom_id) => {
                        warn!(batch_id, custom_id = %custom_id, %reason, "Malformed result line");
                        results.push(BatchResult {
                            custom_id,
                            outcome: ResultOutcome::Invalid { reason },
                        });
                    }
                    None => warn!(batch_id, %reason, "Malformed result line without custom id"),
                }
                continue;
            }
        };

        let defect = match &result.outcome {
            ResultOutcome::Succeeded { text, .. } => content_defect(text),
            _ => None,
        };
        let result = match defect {
            Some(reason) => {
                warn!(
                    batch_id,
                    custom_id = %result.custom_id,
                    %reason,
                    "Rejecting defective result content"
                );
                BatchResult {
                    custom_id: result.custom_id,
                    outcome: ResultOutcome::Invalid { reason },
                }
            }
            None => result,
        };
        results.push(result);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use audition_core::TokenUsage;

    fn parse_text(line: &str) -> Result<BatchResult, String> {
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
        let custom_id = value["custom_id"].as_str().ok_or("no custom_id")?.to_string();
        let text = value["text"].as_str().ok_or("no text")?.to_string();
        Ok(BatchResult {
            custom_id,
            outcome: ResultOutcome::Succeeded {
                text,
                usage: TokenUsage::default(),
            },
        })
    }

    #[test]
    fn accepts_multibyte_text() {
        let body = "{\"custom_id\":\"r_1_0\",\"text\":\"Caf\u{e9} \u{2014} \u{201c}ok\u{201d}\"}\n";
        let results = parse_result_stream(body.as_bytes(), "b", parse_text);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0].outcome,
            ResultOutcome::Succeeded { text, .. } if text == "Caf\u{e9} \u{2014} \u{201c}ok\u{201d}"
        ));
    }

    #[test]
    fn flags_mojibake_and_empty_content() {
        let body = concat!(
            "{\"custom_id\":\"r_1_0\",\"text\":\"It\u{e2}\u{20ac}\u{2122}s\"}\n",
            "{\"custom_id\":\"r_1_1\",\"text\":\"   \"}\n",
        );
        let results = parse_result_stream(body.as_bytes(), "b", parse_text);
        assert_eq!(results.len(), 2);
        for result in results {
            assert!(matches!(result.outcome, ResultOutcome::Invalid { .. }));
        }
    }

    #[test]
    fn invalid_utf8_keeps_custom_id() {
        let mut body = b"{\"custom_id\":\"r_1_0\",\"text\":\"bad ".to_vec();
        body.push(0xff);
        body.extend_from_slice(b"\"}\r\n\n");
        let results = parse_result_stream(&body, "b", parse_text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].custom_id, "r_1_0");
        assert!(matches!(
            &results[0].outcome,
            ResultOutcome::Invalid { reason } if reason.contains("UTF-8")
        ));
    }

    #[test]
    fn unparseable_line_without_id_is_skipped() {
        let body = b"not json\n{\"custom_id\":\"r_1_0\"}\n";
        let results = parse_result_stream(body, "b", parse_text);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].outcome, ResultOutcome::Invalid { .. }));
    }
}
