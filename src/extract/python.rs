//! Indentation-based export extraction for Python modules.

use super::{
    AccessKind, ExportDescriptor, ExtractionFailure, LanguageExtractor, parenthesized,
    required_params, simple_type_name,
};
use crate::candidate::Candidate;
use crate::signature::{EntityKind, Signature, decorator_name};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

static CLASS_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^class\s+([A-Za-z_]\w*)\s*(?:\[[^\]]*\])?\s*(?:\((.*)\))?\s*:")
        .expect("valid regex")
});

static FUNCTION_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("valid regex")
});

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*(?::[^=]+)?=(?:[^=]|$)\s*(.*)$").expect("valid regex")
});

static ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*:\s*[^=]+$").expect("valid regex"));

static SELF_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"self\.([A-Za-z_]\w*)\s*(?::[^=]+)?=(?:[^=]|$)").expect("valid regex")
});

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"]([A-Za-z_]\w*)['"]"#).expect("valid regex"));

const ENUM_BASES: &[&str] = &["Enum", "IntEnum", "StrEnum", "Flag", "IntFlag"];
const INTERFACE_BASES: &[&str] = &["Protocol", "ABC"];

/// Extractor for `.py` files.
#[derive(Debug, Clone)]
pub struct PythonExtractor {
    extensions: Vec<String>,
}

impl PythonExtractor {
    pub fn new() -> Self {
        Self {
            extensions: vec!["py".to_string(), "pyi".to_string()],
        }
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> &str {
        "python"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn extract(
        &self,
        _path: &Path,
        content: &str,
    ) -> Result<Vec<ExportDescriptor>, ExtractionFailure> {
        let lines = logical_lines(content)?;
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        Ok(ModuleParser::default().run(&lines))
    }

    fn language_score(&self, candidate: &Candidate, _signature: &Signature) -> f64 {
        match candidate.file_name.as_str() {
            "setup.py" | "conftest.py" => -20.0,
            "__main__.py" => -10.0,
            "__init__.py" => -5.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug)]
struct ClassState {
    index: usize,
    body_indent: Option<usize>,
    in_init: bool,
}

#[derive(Debug, Default)]
struct ModuleParser {
    items: Vec<ExportDescriptor>,
    class: Option<ClassState>,
    decorators: Vec<String>,
    all: Option<BTreeSet<String>>,
}

impl ModuleParser {
    fn run(mut self, lines: &[&str]) -> Vec<ExportDescriptor> {
        let mut index = 0;
        while index < lines.len() {
            let raw = lines[index];
            let text = raw.trim();
            if text.is_empty() {
                index += 1;
                continue;
            }
            let indent = indentation(raw);
            if indent == 0 {
                self.class = None;
                index = self.top_level(text, lines, index);
            } else {
                self.class_line(indent, text, lines, index);
            }
            index += 1;
        }

        let all = self.all;
        self.items
            .into_iter()
            .filter(|item| match &all {
                Some(names) => names.contains(&item.name),
                None => !item.name.starts_with('_'),
            })
            .collect()
    }

    /// Handles an unindented line, returning the last line it consumed.
    fn top_level(&mut self, text: &str, lines: &[&str], index: usize) -> usize {
        if let Some(decorator) = text.strip_prefix('@') {
            self.decorators.push(decorator.trim().to_string());
            return index;
        }
        let decorators: BTreeSet<String> = self
            .decorators
            .drain(..)
            .map(|d| decorator_name(&d))
            .collect();

        if let Some(caps) = CLASS_DEF.captures(text) {
            let name = &caps[1];
            let bases: Vec<String> = caps
                .get(2)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(str::trim)
                        .filter(|b| !b.is_empty() && !b.contains('='))
                        .map(|b| simple_type_name(b).to_string())
                        .filter(|b| b != "object")
                        .collect()
                })
                .unwrap_or_default();
            let kind = if bases.iter().any(|b| ENUM_BASES.contains(&b.as_str())) {
                EntityKind::Enum
            } else if bases.iter().any(|b| INTERFACE_BASES.contains(&b.as_str())) {
                EntityKind::Interface
            } else {
                EntityKind::Class
            };
            let mut descriptor = ExportDescriptor::new(AccessKind::Named, name, kind, name);
            descriptor.extends = bases.first().cloned();
            descriptor.implements = bases.into_iter().skip(1).collect();
            descriptor.constructor_arity = Some(0);
            descriptor.decorators = decorators;
            self.items.push(descriptor);
            self.class = Some(ClassState {
                index: self.items.len() - 1,
                body_indent: None,
                in_init: false,
            });
            return index;
        }

        if let Some(caps) = FUNCTION_DEF.captures(text) {
            let name = &caps[1];
            let mut descriptor =
                ExportDescriptor::new(AccessKind::Named, name, EntityKind::Function, name);
            descriptor.decorators = decorators;
            self.items.push(descriptor);
            return index;
        }

        if let Some(caps) = ASSIGNMENT.captures(text) {
            let name = &caps[1];
            let value = caps[2].trim();
            if name == "__all__" {
                return self.collect_all(value, lines, index);
            }
            let kind = if value.starts_with("lambda") {
                EntityKind::Function
            } else {
                EntityKind::Object
            };
            self.items
                .push(ExportDescriptor::new(AccessKind::Named, name, kind, name));
        }
        index
    }

    /// Reads an `__all__` list, which may span several lines.
    fn collect_all(&mut self, value: &str, lines: &[&str], index: usize) -> usize {
        let mut text = value.to_string();
        let mut last = index;
        while !text.contains(']') && !text.contains(')') && last + 1 < lines.len() {
            last += 1;
            text.push_str(lines[last]);
        }
        let names = QUOTED
            .captures_iter(&text)
            .map(|caps| caps[1].to_string())
            .collect();
        self.all = Some(names);
        last
    }

    fn class_line(&mut self, indent: usize, text: &str, lines: &[&str], index: usize) {
        let Some(state) = self.class.as_mut() else {
            return;
        };
        let body_indent = *state.body_indent.get_or_insert(indent);
        let descriptor = &mut self.items[state.index];

        if indent > body_indent {
            if state.in_init {
                for caps in SELF_ASSIGN.captures_iter(text) {
                    descriptor.instance_properties.insert(caps[1].to_string());
                }
            }
            return;
        }
        if indent < body_indent {
            return;
        }

        state.in_init = false;
        if let Some(decorator) = text.strip_prefix('@') {
            self.decorators.push(decorator.trim().to_string());
            return;
        }
        let decorators = std::mem::take(&mut self.decorators);

        if let Some(caps) = FUNCTION_DEF.captures(text) {
            let name = &caps[1];
            if name == "__init__" {
                let params = parenthesized(lines, index).unwrap_or_default();
                descriptor.constructor_arity = Some(required_params(&params, &["self"]));
                state.in_init = true;
            } else if decorators
                .iter()
                .any(|d| d == "property" || d == "cached_property" || d.ends_with(".setter"))
            {
                descriptor.properties.insert(name.to_string());
            } else {
                descriptor.methods.insert(name.to_string());
            }
            return;
        }

        let caps = ASSIGNMENT
            .captures(text)
            .or_else(|| ANNOTATION.captures(text));
        if let Some(caps) = caps {
            descriptor.properties.insert(caps[1].to_string());
        }
    }
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Drops comments and triple-quoted blocks, keeping one entry per source line.
fn logical_lines(content: &str) -> Result<Vec<String>, ExtractionFailure> {
    let mut lines = Vec::new();
    let mut open: Option<(&str, usize)> = None;
    for (number, line) in content.lines().enumerate() {
        let mut kept = String::new();
        let mut rest = line;
        loop {
            if let Some((delimiter, _)) = open {
                match rest.find(delimiter) {
                    Some(end) => {
                        rest = &rest[end + 3..];
                        open = None;
                    }
                    None => break,
                }
            } else {
                let next = ["\"\"\"", "'''"]
                    .into_iter()
                    .filter_map(|d| rest.find(d).map(|at| (at, d)))
                    .min();
                let comment = comment_start(rest);
                match next {
                    Some((at, delimiter)) if comment.is_none_or(|c| at < c) => {
                        kept.push_str(&rest[..at]);
                        kept.push_str("\"\"");
                        rest = &rest[at + 3..];
                        open = Some((delimiter, number + 1));
                    }
                    _ => {
                        kept.push_str(&rest[..comment.unwrap_or(rest.len())]);
                        break;
                    }
                }
            }
        }
        lines.push(kept.trim_end().to_string());
    }
    if let Some((_, line)) = open {
        return Err(ExtractionFailure::Parse {
            line,
            message: "unterminated triple-quoted string".to_string(),
        });
    }
    Ok(lines)
}

/// Byte offset of a `#` comment outside single-line string literals.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, '#') => return Some(i),
            _ => {}
        }
    }
    None
}
