use regex::Regex;
use std::sync::OnceLock;

static PATTERNS: OnceLock<Vec<(Regex, String)>> = OnceLock::new();

/// Redacts personal data from text that ends up in log lines.
///
/// Remote errors frequently echo the document path or the account that made
/// the request, so anything coming back from the backend goes through here
/// before it is logged.
pub struct LogSanitizer {
    patterns: Vec<(Regex, String)>,
}

impl LogSanitizer {
    pub fn new() -> Self {
        let patterns = PATTERNS.get_or_init(|| {
            let compile = |pattern: &str| Regex::new(pattern).expect("static sanitizer pattern");
            vec![
                (
                    compile(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}"),
                    "***@***.***".to_string(),
                ),
                // Document paths: users/{uid}/data/{collection}
                (compile(r"users/[^/\s]+"), "users/***".to_string()),
                (
                    compile(r"(?i)(bearer\s+)[a-zA-Z0-9._\-]+"),
                    "${1}***".to_string(),
                ),
                (
                    compile(r"(/home/|C:\\Users\\)[^/\\\s]+"),
                    "$1***".to_string(),
                ),
                (
                    compile(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b"),
                    "***.***.***.***".to_string(),
                ),
            ]
        });

        Self {
            patterns: patterns.clone(),
        }
    }

    pub fn sanitize(&self, message: &str) -> String {
        let mut result = message.to_string();
        for (pattern, replacement) in &self.patterns {
            result = pattern.replace_all(&result, replacement.as_str()).to_string();
        }
        result
    }
}

impl Default for LogSanitizer {
    fn default() -> Self {
        Self::new()
    }
}
