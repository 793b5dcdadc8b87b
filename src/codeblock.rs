//! Pulling executable Lua out of an oracle response.
//!
//! Models are told to answer with bare source, but they regularly wrap it in
//! a Markdown fence or add a sentence of narration. Extraction resolves that
//! into one of three outcomes:
//!
//! - a fenced block, preferring one tagged `lua` over the first fence;
//! - otherwise the response with leading and trailing prose lines stripped;
//! - [`Extraction::Empty`] or [`Extraction::Prose`] when nothing runnable
//!   remains.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Code(String),
    /// The response was blank.
    Empty,
    /// The response contained text but nothing that looks like code.
    Prose,
}

struct Fence {
    tag: String,
    body: String,
}

pub fn extract_code(response: &str) -> Extraction {
    if response.trim().is_empty() {
        return Extraction::Empty;
    }

    let fences = fenced_blocks(response);
    if !fences.is_empty() {
        let chosen = fences
            .iter()
            .find(|f| f.tag.eq_ignore_ascii_case("lua") && !f.body.trim().is_empty())
            .or_else(|| fences.iter().find(|f| !f.body.trim().is_empty()));
        return match chosen {
            Some(fence) => Extraction::Code(fence.body.trim_end().to_string()),
            None => Extraction::Empty,
        };
    }

    strip_narration(response)
}

/// Body of the first non-empty fenced block, whatever its tag.
pub fn first_fenced_block(text: &str) -> Option<String> {
    fenced_blocks(text)
        .into_iter()
        .find(|f| !f.body.trim().is_empty())
        .map(|f| f.body.trim_end().to_string())
}

/// Collect every ```-fenced block. An unterminated fence runs to the end.
fn fenced_blocks(text: &str) -> Vec<Fence> {
    let mut fences = Vec::new();
    let mut current: Option<Fence> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(info) = trimmed.strip_prefix("```") {
            match current.take() {
                Some(fence) => fences.push(fence),
                None => {
                    current = Some(Fence {
                        tag: info.trim().to_string(),
                        body: String::new(),
                    })
                }
            }
            continue;
        }
        if let Some(fence) = current.as_mut() {
            fence.body.push_str(line);
            fence.body.push('\n');
        }
    }
    if let Some(fence) = current {
        fences.push(fence);
    }
    fences
}

/// Trim prose lines off both ends. The remaining span must contain at least
/// one real statement, otherwise the reply is prose.
fn strip_narration(text: &str) -> Extraction {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| looks_like_code(l));
    let last = lines.iter().rposition(|l| looks_like_code(l));
    match (first, last) {
        (Some(first), Some(last)) if lines[first..=last].iter().any(|l| is_statement(l)) => {
            Extraction::Code(lines[first..=last].join("\n"))
        }
        _ => Extraction::Prose,
    }
}

/// Heuristic for a line of Lua against the document adapter.
fn looks_like_code(line: &str) -> bool {
    let t = line.trim();
    if t.is_empty() {
        return false;
    }
    if t.starts_with("--") || is_statement(t) {
        return true;
    }
    let first_word = t
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default();
    match first_word {
        "local" | "function" | "return" | "until" => !t.ends_with(['.', '!', '?', ':']),
        "for" | "while" => t.ends_with(" do"),
        "if" | "elseif" => t.ends_with(" then"),
        "end" | "else" | "repeat" | "do" => t.trim_end_matches([')', ',', ';']) == first_word,
        // Closing lines of a multi-line table or call.
        _ => t.chars().all(|c| matches!(c, '}' | ')' | ']' | ',' | ';')),
    }
}

/// A line that touches the document adapter, assigns, or calls something.
fn is_statement(line: &str) -> bool {
    let t = line.trim();
    if t.contains("docx.") || t.contains("output_path") || t.contains(":save(") {
        return true;
    }
    let t = t.strip_prefix("local ").unwrap_or(t).trim_start();
    let target_len = t
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '[' | ']')))
        .unwrap_or(t.len());
    let (target, rest) = t.split_at(target_len);
    if target.is_empty() || target.starts_with(|c: char| c.is_ascii_digit()) {
        return false;
    }
    let rest = rest.trim_start();
    rest.starts_with('(') || (rest.starts_with('=') && !rest.starts_with("=="))
}
