const REDACTED: &str = "***REDACTED***";

/// Query keys whose values are secrets.
const SENSITIVE_KEYS: &[&str] = &[
    "apikey=",
    "apiKey=",
    "token=",
    "api_token=",
    "authorization=",
    "x-api-key=",
];

/// Mask the value of every credential-bearing `key=value` pair in `text`.
///
/// A value runs until the next `&` or whitespace. Already-redacted text is left as is.
pub fn redact(text: &str) -> String {
    SENSITIVE_KEYS
        .iter()
        .fold(text.to_string(), |acc, key| redact_key(&acc, key))
}

fn redact_key(text: &str, key: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find(key) {
        let value_start = i + key.len();
        out.push_str(&rest[..value_start]);
        out.push_str(REDACTED);
        let after = &rest[value_start..];
        let end = after
            .find(|c: char| c == '&' || c.is_whitespace())
            .unwrap_or(after.len());
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

pub fn redact_all(warnings: &[String]) -> Vec<String> {
    warnings.iter().map(|w| redact(w)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_query_secrets() {
        let text = "GET https://x.test/q?symbol=GM&apikey=abc123&limit=4 failed";
        assert_eq!(
            redact(text),
            "GET https://x.test/q?symbol=GM&apikey=***REDACTED***&limit=4 failed"
        );
        assert_eq!(
            redact("token=zzz"),
            "token=***REDACTED***"
        );
        assert_eq!(
            redact("u?api_token=s3cr3t"),
            "u?api_token=***REDACTED***"
        );
    }

    #[test]
    fn test_idempotent() {
        let once = redact("https://api.polygon.io/v2?apiKey=k&x=1");
        assert_eq!(redact(&once), once);
        assert!(!once.contains("apiKey=k&"));
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(redact("Primary quote pull failed: HTTP 503"), "Primary quote pull failed: HTTP 503");
    }
}
