use regex::Regex;
use std::sync::OnceLock;

use crate::types::{InterventionSuggestion, SuggestionKind};

pub const NO_ANALYSIS: &str = "No detailed analysis available";
pub const NO_SUGGESTION: &str = "No detailed suggestion available";
pub const NO_ERROR_DESCRIPTION: &str = "No error description available";
pub const NO_CAUSE: &str = "No cause analysis available";
pub const NO_FIX: &str = "No fix suggestion available";
pub const NO_EXAMPLE: &str = "No example available";

pub const GENERAL_HEADING: &str = "General improvement suggestions";
pub const NARRATIVE_MARKER: &str = "🔍 To explain";

static ERROR_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static SUBSECTION_RE: OnceLock<Regex> = OnceLock::new();
static LEVEL2_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static GENERAL_HEADING_RE: OnceLock<Regex> = OnceLock::new();
static NARRATIVE_FIELD_RE: OnceLock<Regex> = OnceLock::new();

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

fn error_heading_re() -> &'static Regex {
    // The Vietnamese heading is what the model emits when it mirrors its own language
    regex(&ERROR_HEADING_RE, r"(?m)^[ \t]*##[ \t]*(?:Error|Lỗi)[ \t]+\d+[ \t]*:")
}

fn subsection_re() -> &'static Regex {
    regex(&SUBSECTION_RE, r"###[ \t]*\d+\.")
}

fn level2_heading_re() -> &'static Regex {
    regex(&LEVEL2_HEADING_RE, r"(?m)^[ \t]*##[^#]")
}

fn general_heading_re() -> &'static Regex {
    regex(
        &GENERAL_HEADING_RE,
        r"(?m)^[ \t]*##[ \t]*(?:General improvement suggestions|Đề xuất cải thiện chung)[^\n]*\n?",
    )
}

fn narrative_field_re() -> &'static Regex {
    regex(
        &NARRATIVE_FIELD_RE,
        r"(?P<error>📌[ \t]*Error:)|(?P<cause>🧠[ \t]*Cause:)|(?P<fix>🛠\x{FE0F}?[ \t]*Fix:)|(?P<example>💻[ \t]*Example:)",
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Markdown,
    Narrative,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSection {
    Markdown {
        name: String,
        analysis: String,
        improvement: String,
    },
    Narrative {
        name: String,
        error: String,
        cause: String,
        fix: String,
        example: String,
    },
}

impl ErrorSection {
    pub fn name(&self) -> &str {
        match self {
            ErrorSection::Markdown { name, .. } | ErrorSection::Narrative { name, .. } => name,
        }
    }

    fn render(&self) -> String {
        match self {
            ErrorSection::Markdown {
                name,
                analysis,
                improvement,
            } => format!("## {}\n{}\n### Improvement suggestions\n{}", name, analysis, improvement),
            ErrorSection::Narrative {
                name,
                error,
                cause,
                fix,
                example,
            } => format!(
                "## {}\nError: {}\nCause: {}\n### Improvement suggestions\n{}\nExample: {}",
                name, error, cause, fix, example
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Matched {
        grammar: Grammar,
        sections: Vec<ErrorSection>,
    },
    NoMatch,
}

pub fn parse_sections(text: &str) -> ParseResult {
    let markdown = parse_markdown(text);
    if !markdown.is_empty() {
        return ParseResult::Matched {
            grammar: Grammar::Markdown,
            sections: markdown,
        };
    }

    let narrative = parse_narrative(text);
    if !narrative.is_empty() {
        return ParseResult::Matched {
            grammar: Grammar::Narrative,
            sections: narrative,
        };
    }

    ParseResult::NoMatch
}

// Cuts a section at the first level-2 heading so trailing general advice is
// not folded into the last error.
fn until_next_heading(section: &str) -> &str {
    match level2_heading_re().find(section) {
        Some(m) => &section[..m.start()],
        None => section,
    }
}

fn non_empty_or(value: &str, placeholder: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        placeholder.to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_markdown(text: &str) -> Vec<ErrorSection> {
    error_heading_re()
        .split(text)
        .skip(1)
        .enumerate()
        .map(|(idx, raw)| {
            let (first_line, rest) = raw.split_once('\n').unwrap_or((raw, ""));
            let name = non_empty_or(first_line, &format!("Error {}", idx + 1));

            let body = until_next_heading(rest);
            let parts: Vec<&str> = subsection_re().split(body).collect();

            ErrorSection::Markdown {
                name,
                analysis: non_empty_or(parts.get(1).copied().unwrap_or(""), NO_ANALYSIS),
                improvement: non_empty_or(parts.get(2).copied().unwrap_or(""), NO_SUGGESTION),
            }
        })
        .collect()
}

fn parse_narrative(text: &str) -> Vec<ErrorSection> {
    text.split(NARRATIVE_MARKER)
        .skip(1)
        .enumerate()
        .map(|(idx, raw)| {
            let block = until_next_heading(raw);
            let (first_line, _) = block.split_once('\n').unwrap_or((block, ""));
            let name = first_line
                .trim()
                .trim_start_matches(|c: char| c == '.' || c == '…' || c == ':')
                .trim()
                .to_string();
            let name = if name.is_empty() || narrative_field_re().is_match(&name) {
                format!("Error {}", idx + 1)
            } else {
                name
            };

            let fields = narrative_fields(block);
            ErrorSection::Narrative {
                name,
                error: non_empty_or(fields[0], NO_ERROR_DESCRIPTION),
                cause: non_empty_or(fields[1], NO_CAUSE),
                fix: non_empty_or(fields[2], NO_FIX),
                example: non_empty_or(fields[3], NO_EXAMPLE),
            }
        })
        .collect()
}

// Extracts error/cause/fix/example in that order. Each value runs from its
// marker to whichever marker follows it, so marker order in the text does
// not matter. Only the first occurrence of each marker is used.
fn narrative_fields(block: &str) -> [&str; 4] {
    const NAMES: [&str; 4] = ["error", "cause", "fix", "example"];

    let markers: Vec<(usize, usize, usize)> = narrative_field_re()
        .captures_iter(block)
        .filter_map(|caps| {
            NAMES.iter().enumerate().find_map(|(kind, name)| {
                caps.name(name).map(|m| (kind, m.start(), m.end()))
            })
        })
        .collect();

    let mut fields = [""; 4];
    let mut seen = [false; 4];
    for (i, &(kind, _, end)) in markers.iter().enumerate() {
        if seen[kind] {
            continue;
        }
        seen[kind] = true;
        let stop = markers.get(i + 1).map_or(block.len(), |next| next.1);
        fields[kind] = &block[end..stop];
    }
    fields
}

fn general_content(text: &str) -> String {
    if let Some(heading) = general_heading_re().find(text) {
        let content = until_next_heading(&text[heading.end()..]).trim();
        if !content.is_empty() {
            return content.to_string();
        }
    }
    text.trim().to_string()
}

fn general_suggestion(text: &str, studentid: &str) -> InterventionSuggestion {
    InterventionSuggestion {
        id: format!("general_{}", studentid),
        title: GENERAL_HEADING.to_string(),
        content: format!("## {}\n{}", GENERAL_HEADING, general_content(text)),
        kind: SuggestionKind::Info,
    }
}

pub fn parse_intervention_suggestions(
    text: &str,
    studentid: &str,
    error_messages: &[String],
) -> Vec<InterventionSuggestion> {
    let (mut suggestions, matched) = match parse_sections(text) {
        ParseResult::Matched { sections, .. } => {
            let suggestions = sections
                .iter()
                .enumerate()
                .map(|(idx, section)| InterventionSuggestion {
                    id: format!("error_{}_{}", idx + 1, studentid),
                    title: format!("Improvement suggestion for {}", section.name()),
                    content: section.render(),
                    kind: SuggestionKind::Info,
                })
                .collect::<Vec<_>>();
            (suggestions, true)
        }
        ParseResult::NoMatch => (Vec::new(), false),
    };

    if error_messages.is_empty() || !matched {
        suggestions.push(general_suggestion(text, studentid));
    }
    suggestions
}
