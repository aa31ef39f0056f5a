//! Content pattern checks — placeholder markers and delimiter balance.

/// Markers that indicate the model submitted unfinished work.
///
/// Matching is case-insensitive. These are checked against content-bearing
/// fields only (per the tool schema), never against targets or flags.
const PLACEHOLDER_MARKERS: &[&str] = &[
    "todo:",
    "fixme:",
    "<placeholder",
    "<insert",
    "your_code_here",
    "your code here",
    "rest of the file",
    "rest of file",
    "remains unchanged",
    "remains the same",
    "... existing code ...",
    "/* ... */",
    "# ...",
    "unimplemented!()",
];

/// Find placeholder markers in a content string. Returns the matched
/// markers, deduplicated, in declaration order.
pub fn find_placeholders(content: &str) -> Vec<&'static str> {
    let lowered = content.to_lowercase();
    PLACEHOLDER_MARKERS
        .iter()
        .filter(|marker| lowered.contains(**marker))
        .copied()
        .collect()
}

/// Whether a payload looks like code rather than prose. Code-like
/// payloads get the delimiter-balance check; prose is exempt because an
/// unmatched parenthesis in a sentence is fine.
pub fn looks_like_code(content: &str) -> bool {
    if !content.contains('\n') {
        return false;
    }
    let signals = ["{", "};", "fn ", "def ", "=> ", "import ", "return "];
    signals.iter().any(|s| content.contains(s))
}

/// Check that (), [], and {} are balanced. Returns `Err` with a short
/// description of the first problem found.
///
/// Scanning is naive by intent: delimiters inside string literals count.
/// That produces occasional false positives on code embedding brackets in
/// strings, which surface as warnings, not blocks.
pub fn check_delimiters(content: &str) -> Result<(), String> {
    let mut stack: Vec<char> = Vec::new();

    for (i, c) in content.chars().enumerate() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some(open) if open == expected => {}
                    Some(open) => {
                        return Err(format!(
                            "mismatched delimiter at offset {i}: found '{c}' closing '{open}'"
                        ));
                    }
                    None => {
                        return Err(format!("unmatched '{c}' at offset {i}"));
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("unclosed '{open}' ({} left open)", stack.len()));
    }
    Ok(())
}
