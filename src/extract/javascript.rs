//! Line-oriented export extraction for JavaScript and TypeScript.
//!
//! Handles ES module exports (default, named, export lists), CommonJS
//! `module.exports`/`exports.x`, classes, functions, arrow functions, object
//! literals, and TypeScript interfaces and enums. Comments, string and
//! template contents, and regular expression literals are blanked before
//! matching so braces inside them don't skew nesting.

use super::{
    AccessKind, ExportDescriptor, ExtractionFailure, LanguageExtractor, parenthesized,
    required_params, simple_type_name,
};
use crate::candidate::Candidate;
use crate::signature::{EntityKind, Signature, decorator_name};
use regex::Regex;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;
use std::sync::LazyLock;

static CLASS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(export\s+)?(default\s+)?(?:declare\s+)?(?:abstract\s+)?class\b\s*([A-Za-z_$][\w$]*)?(?:\s*<[^>{]*>)?(?:\s+extends\s+([\w$.]+)(?:\s*<[^>{]*>)?)?(?:\s+implements\s+([^{]+))?",
    )
    .expect("valid regex")
});

static FUNCTION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(export\s+)?(default\s+)?(?:declare\s+)?(?:async\s+)?function\b\s*\*?\s*([A-Za-z_$][\w$]*)?\s*(?:<[^>]*>)?\s*\(",
    )
    .expect("valid regex")
});

static VARIABLE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(.*)$")
        .expect("valid regex")
});

static INTERFACE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(export\s+)?(?:declare\s+)?interface\s+([A-Za-z_$][\w$]*)(?:\s*<[^>{]*>)?(?:\s+extends\s+([^{]+))?",
    )
    .expect("valid regex")
});

static ENUM_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+([A-Za-z_$][\w$]*)")
        .expect("valid regex")
});

static EXPORT_DEFAULT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^export\s+default\s+([A-Za-z_$][\w$]*)\s*;?$").expect("valid regex")
});

static EXPORT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^export\s*\{([^}]*)\}\s*(from\b)?").expect("valid regex")
});

static MODULE_EXPORTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^module\.exports\s*=\s*(.*)$").expect("valid regex")
});

static EXPORTS_MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=\s*(.*)$").expect("valid regex")
});

static CLASS_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^class\b\s*([A-Za-z_$][\w$]*)?(?:\s+extends\s+([\w$.]+))?").expect("valid regex")
});

static FUNCTION_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:async\s+)?(?:function\b\s*\*?\s*([A-Za-z_$][\w$]*)?\s*\(|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>)",
    )
    .expect("valid regex")
});

static ANONYMOUS_EXTENDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bclass\s+extends\s+([\w$.]+)").expect("valid regex"));

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_$][\w$]*)\s*;?$").expect("valid regex"));

static CLASS_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^((?:(?:public|private|protected|static|async|override|abstract|readonly|declare)\s+)*)(?:(get|set)\s+)?\*?\s*(#?[A-Za-z_$][\w$]*)\s*[?!]?\s*(?:<[^>]*>)?\s*\(",
    )
    .expect("valid regex")
});

static CLASS_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^((?:(?:public|private|protected|static|readonly|declare|override)\s+)*)(#?[A-Za-z_$][\w$]*)\s*[?!]?\s*(:|=|;|$)(.*)$",
    )
    .expect("valid regex")
});

static OBJECT_MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:readonly\s+)?(?:async\s+)?\*?\s*([A-Za-z_$][\w$]*)\s*\??\s*(\(|:|,|=|$)(.*)$",
    )
    .expect("valid regex")
});

static THIS_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"this\.([A-Za-z_$][\w$]*)\s*=[^=]").expect("valid regex")
});

const KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "new", "await", "yield",
    "super", "throw", "else", "do", "try",
];

/// Extractor for `.js`-family and `.ts`-family files.
#[derive(Debug, Clone)]
pub struct JavaScriptExtractor {
    language: &'static str,
    extensions: Vec<String>,
}

impl JavaScriptExtractor {
    pub fn javascript() -> Self {
        Self {
            language: "javascript",
            extensions: ["js", "mjs", "cjs", "jsx"].map(String::from).to_vec(),
        }
    }

    pub fn typescript() -> Self {
        Self {
            language: "typescript",
            extensions: ["ts", "tsx", "mts", "cts"].map(String::from).to_vec(),
        }
    }
}

impl LanguageExtractor for JavaScriptExtractor {
    fn language(&self) -> &str {
        self.language
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn extract(
        &self,
        _path: &Path,
        content: &str,
    ) -> Result<Vec<ExportDescriptor>, ExtractionFailure> {
        let cleaned = clean_source(content);
        let lines: Vec<&str> = cleaned.iter().map(String::as_str).collect();
        let mut parser = ModuleParser::default();
        parser.run(&lines)?;
        Ok(parser.finish())
    }

    fn language_score(&self, candidate: &Candidate, _signature: &Signature) -> f64 {
        let name = candidate.file_name.to_ascii_lowercase();
        if name.contains(".config.") || name.contains(".stories.") {
            -15.0
        } else if name.starts_with("index.") {
            -3.0
        } else {
            0.0
        }
    }
}

/// A top-level binding, possibly exported under one or more names.
#[derive(Debug)]
struct Local {
    descriptor: ExportDescriptor,
    exports: Vec<(AccessKind, String)>,
}

/// The block whose members are currently being collected.
#[derive(Debug, Clone, Copy)]
enum Block {
    Class(usize),
    Object(usize),
    Interface(usize),
    Enum(usize),
    /// `module.exports = { ... }` spanning lines.
    ExportObject,
}

#[derive(Debug, Default)]
struct ModuleParser {
    locals: Vec<Local>,
    /// (access, exported name, local name) resolved after the walk.
    references: Vec<(AccessKind, String, String)>,
    block: Option<Block>,
    in_constructor: bool,
    /// Decorators seen since the last top-level statement.
    decorators: Vec<String>,
}

impl ModuleParser {
    fn run(&mut self, lines: &[&str]) -> Result<(), ExtractionFailure> {
        let mut depth = 0i32;
        for (index, raw) in lines.iter().enumerate() {
            let line = raw.trim();
            let start_depth = depth;

            if start_depth == 0 {
                self.block = None;
                self.in_constructor = false;
                if !line.is_empty() {
                    self.top_level(line);
                }
            } else if start_depth == 1 {
                self.in_constructor = false;
                if let Some(block) = self.block {
                    self.member(block, line, lines, index);
                }
            } else if self.in_constructor {
                self.constructor_assignments(line);
            }

            depth += brace_delta(line);
            if depth < 0 {
                return Err(ExtractionFailure::Parse {
                    line: index + 1,
                    message: "unbalanced closing brace".to_string(),
                });
            }
        }
        Ok(())
    }

    fn finish(self) -> Vec<ExportDescriptor> {
        let mut exports = Vec::new();
        for local in &self.locals {
            for (access, exported) in &local.exports {
                exports.push(with_access(&local.descriptor, *access, exported));
            }
        }
        for (access, exported, local_name) in &self.references {
            if let Some(local) = self.locals.iter().find(|l| l.descriptor.name == *local_name) {
                exports.push(with_access(&local.descriptor, *access, exported));
            }
        }
        exports
            .dedup_by(|a, b| a.access_kind == b.access_kind && a.exported_name == b.exported_name);
        exports
    }

    fn push_local(
        &mut self,
        descriptor: ExportDescriptor,
        export: Option<(AccessKind, String)>,
    ) -> usize {
        self.locals.push(Local {
            descriptor,
            exports: export.into_iter().collect(),
        });
        self.locals.len() - 1
    }

    fn top_level(&mut self, line: &str) {
        if let Some(decorator) = line.strip_prefix('@') {
            self.decorators.push(decorator_name(decorator));
            return;
        }
        let decorators = std::mem::take(&mut self.decorators);

        if let Some(caps) = CLASS_DECL.captures(line) {
            let exported = caps.get(1).is_some();
            let default = caps.get(2).is_some();
            // `class extends Base` has no name of its own
            let anonymous = caps.get(3).is_some_and(|m| m.as_str() == "extends");
            let name = caps
                .get(3)
                .filter(|_| !anonymous)
                .map_or("default", |m| m.as_str());
            let mut descriptor =
                ExportDescriptor::new(AccessKind::Named, name, EntityKind::Class, name);
            descriptor.extends = if anonymous {
                ANONYMOUS_EXTENDS.captures(line).map(|c| simple_type_name(&c[1]).to_string())
            } else {
                caps.get(4).map(|m| simple_type_name(m.as_str()).to_string())
            };
            descriptor.implements = caps
                .get(5)
                .map(|m| type_list(m.as_str()))
                .unwrap_or_default();
            descriptor.constructor_arity = Some(0);
            descriptor.decorators = decorators.into_iter().collect();
            let export = export_of(exported, default, name);
            let idx = self.push_local(descriptor, export);
            self.block = Some(Block::Class(idx));
            return;
        }

        if let Some(caps) = FUNCTION_DECL.captures(line) {
            let name = caps.get(3).map_or("default", |m| m.as_str());
            let descriptor =
                ExportDescriptor::new(AccessKind::Named, name, EntityKind::Function, name);
            let export = export_of(caps.get(1).is_some(), caps.get(2).is_some(), name);
            self.push_local(descriptor, export);
            return;
        }

        if let Some(caps) = INTERFACE_DECL.captures(line) {
            let name = &caps[2];
            let mut descriptor =
                ExportDescriptor::new(AccessKind::Named, name, EntityKind::Interface, name);
            let bases = caps.get(3).map(|m| type_list(m.as_str())).unwrap_or_default();
            descriptor.extends = bases.first().cloned();
            descriptor.implements = bases.into_iter().skip(1).collect();
            let export = export_of(caps.get(1).is_some(), false, name);
            let idx = self.push_local(descriptor, export);
            self.block = Some(Block::Interface(idx));
            return;
        }

        if let Some(caps) = ENUM_DECL.captures(line) {
            let name = &caps[2];
            let descriptor = ExportDescriptor::new(AccessKind::Named, name, EntityKind::Enum, name);
            let export = export_of(caps.get(1).is_some(), false, name);
            let idx = self.push_local(descriptor, export);
            self.block = Some(Block::Enum(idx));
            return;
        }

        if let Some(caps) = VARIABLE_DECL.captures(line) {
            let name = caps[2].to_string();
            let export = export_of(caps.get(1).is_some(), false, &name);
            self.binding(&name, caps[3].trim(), export);
            return;
        }

        if let Some(caps) = EXPORT_DEFAULT_REF.captures(line) {
            self.references
                .push((AccessKind::Default, "default".to_string(), caps[1].to_string()));
            return;
        }

        if let Some(rest) = line.strip_prefix("export default ") {
            let rest = rest.trim();
            if rest.starts_with('{') {
                let descriptor = ExportDescriptor::new(
                    AccessKind::Default,
                    "default",
                    EntityKind::Object,
                    "default",
                );
                let export = Some((AccessKind::Default, "default".to_string()));
                let idx = self.push_local(descriptor, export);
                self.block = Some(Block::Object(idx));
            } else {
                self.binding(
                    "default",
                    rest,
                    Some((AccessKind::Default, "default".to_string())),
                );
            }
            return;
        }

        if let Some(caps) = EXPORT_LIST.captures(line) {
            if caps.get(2).is_some() {
                // Re-exports point into other modules
                return;
            }
            for (local, exported) in export_list_entries(&caps[1]) {
                let access = if exported == "default" {
                    AccessKind::Default
                } else {
                    AccessKind::Named
                };
                self.references.push((access, exported, local));
            }
            return;
        }

        if let Some(caps) = MODULE_EXPORTS.captures(line) {
            let rhs = caps[1].trim().trim_end_matches(';').trim();
            if let Some(caps) = IDENTIFIER.captures(rhs) {
                self.references
                    .push((AccessKind::Direct, "module.exports".to_string(), caps[1].to_string()));
            } else if let Some(inner) = rhs.strip_prefix('{') {
                if let Some(body) = inner.strip_suffix('}') {
                    for (local, exported) in object_shorthand_entries(body) {
                        self.references.push((AccessKind::Named, exported, local));
                    }
                } else {
                    self.block = Some(Block::ExportObject);
                }
            } else {
                self.binding(
                    "module.exports",
                    rhs,
                    Some((AccessKind::Direct, "module.exports".to_string())),
                );
            }
            return;
        }

        if let Some(caps) = EXPORTS_MEMBER.captures(line) {
            let exported = caps[1].to_string();
            let rhs = caps[2].trim().trim_end_matches(';').trim();
            if let Some(ident) = IDENTIFIER.captures(rhs) {
                self.references
                    .push((AccessKind::Named, exported, ident[1].to_string()));
            } else {
                let name = exported.clone();
                self.binding(&name, rhs, Some((AccessKind::Named, exported)));
            }
        }
    }

    /// Classifies the right-hand side of a binding.
    fn binding(&mut self, name: &str, rhs: &str, export: Option<(AccessKind, String)>) {
        if rhs.starts_with("require(") || rhs.starts_with("await import(") {
            return;
        }
        if let Some(caps) = CLASS_EXPR.captures(rhs) {
            let declared = caps.get(1).map_or(name, |m| m.as_str());
            let mut descriptor =
                ExportDescriptor::new(AccessKind::Named, name, EntityKind::Class, declared);
            descriptor.extends = caps.get(2).map(|m| simple_type_name(m.as_str()).to_string());
            descriptor.constructor_arity = Some(0);
            let idx = self.push_local(descriptor, export);
            self.block = Some(Block::Class(idx));
            return;
        }
        if let Some(caps) = FUNCTION_EXPR.captures(rhs) {
            let declared = if name == "module.exports" || name == "default" {
                caps.get(1).map_or(name, |m| m.as_str())
            } else {
                name
            };
            let descriptor =
                ExportDescriptor::new(AccessKind::Named, name, EntityKind::Function, declared);
            self.push_local(descriptor, export);
            return;
        }
        let descriptor = ExportDescriptor::new(AccessKind::Named, name, EntityKind::Object, name);
        let idx = self.push_local(descriptor, export);
        if rhs.starts_with('{') && !rhs.ends_with('}') && !rhs.ends_with("};") {
            self.block = Some(Block::Object(idx));
        } else if let Some(body) = rhs
            .strip_prefix('{')
            .and_then(|r| r.trim_end_matches(';').strip_suffix('}'))
        {
            for (member, _) in object_shorthand_entries(body) {
                self.locals[idx].descriptor.properties.insert(member);
            }
        }
    }

    fn member(&mut self, block: Block, line: &str, lines: &[&str], index: usize) {
        if line.is_empty() || line.starts_with('}') || line.starts_with('@') {
            return;
        }
        match block {
            Block::Class(idx) => self.class_member(idx, line, lines, index),
            Block::Object(idx) => {
                let descriptor = &mut self.locals[idx].descriptor;
                if let Some((name, is_method)) = object_member(line) {
                    if is_method {
                        descriptor.methods.insert(name);
                    } else {
                        descriptor.properties.insert(name);
                    }
                }
            }
            Block::Interface(idx) => {
                let descriptor = &mut self.locals[idx].descriptor;
                if let Some(caps) = OBJECT_MEMBER.captures(line) {
                    let name = caps[1].to_string();
                    let is_method = &caps[2] == "("
                        || (&caps[2] == ":" && caps[3].contains("=>"));
                    if is_method {
                        descriptor.methods.insert(name);
                    } else {
                        descriptor.properties.insert(name);
                    }
                }
            }
            Block::Enum(idx) => {
                if let Some(caps) = OBJECT_MEMBER.captures(line) {
                    self.locals[idx].descriptor.properties.insert(caps[1].to_string());
                }
            }
            Block::ExportObject => {
                if let Some(caps) = OBJECT_MEMBER.captures(line) {
                    let exported = caps[1].to_string();
                    let local = match caps[2].trim() {
                        ":" => caps[3]
                            .trim()
                            .trim_end_matches(',')
                            .trim()
                            .to_string(),
                        _ => exported.clone(),
                    };
                    self.references.push((AccessKind::Named, exported, local));
                }
            }
        }
    }

    fn class_member(&mut self, idx: usize, line: &str, lines: &[&str], index: usize) {
        if line.starts_with("constructor") && line[11..].trim_start().starts_with('(') {
            let arity = parenthesized(lines, index).map_or(0, |p| required_params(&p, &[]));
            self.locals[idx].descriptor.constructor_arity = Some(arity);
            self.in_constructor = true;
            self.constructor_assignments(line);
            return;
        }

        let descriptor = &mut self.locals[idx].descriptor;
        if let Some(caps) = CLASS_METHOD.captures(line) {
            let name = &caps[3];
            if name.starts_with('#') || KEYWORDS.contains(&name) {
                return;
            }
            if caps.get(2).is_some() {
                descriptor.properties.insert(name.to_string());
            } else {
                descriptor.methods.insert(name.to_string());
            }
            return;
        }
        if let Some(caps) = CLASS_FIELD.captures(line) {
            let name = &caps[2];
            if name.starts_with('#') || KEYWORDS.contains(&name) {
                return;
            }
            let is_static = caps[1].contains("static");
            let value = caps[4].trim();
            if &caps[3] == "=" && FUNCTION_EXPR.is_match(value) {
                descriptor.methods.insert(name.to_string());
            } else if is_static {
                descriptor.properties.insert(name.to_string());
            } else {
                descriptor.instance_properties.insert(name.to_string());
            }
        }
    }

    fn constructor_assignments(&mut self, line: &str) {
        let Some(Block::Class(idx)) = self.block else {
            return;
        };
        for caps in THIS_ASSIGN.captures_iter(line) {
            self.locals[idx]
                .descriptor
                .instance_properties
                .insert(caps[1].to_string());
        }
    }
}

fn with_access(
    descriptor: &ExportDescriptor,
    access: AccessKind,
    exported: &str,
) -> ExportDescriptor {
    let mut exported_descriptor = descriptor.clone();
    exported_descriptor.access_kind = access;
    exported_descriptor.exported_name = exported.to_string();
    exported_descriptor
}

fn export_of(exported: bool, default: bool, name: &str) -> Option<(AccessKind, String)> {
    match (exported, default) {
        (true, true) => Some((AccessKind::Default, "default".to_string())),
        (true, false) => Some((AccessKind::Named, name.to_string())),
        _ => None,
    }
}

fn type_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(simple_type_name)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `a, b as c` into (local, exported) pairs.
fn export_list_entries(body: &str) -> Vec<(String, String)> {
    body.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with("type "))
        .map(|entry| match entry.split_once(" as ") {
            Some((local, exported)) => (local.trim().to_string(), exported.trim().to_string()),
            None => (entry.to_string(), entry.to_string()),
        })
        .collect()
}

/// Parses `{ a, b: c }` bodies into (local, key) pairs.
fn object_shorthand_entries(body: &str) -> Vec<(String, String)> {
    body.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with("..."))
        .filter_map(|entry| match entry.split_once(':') {
            Some((key, value)) => {
                let value = value.trim();
                IDENTIFIER
                    .is_match(value)
                    .then(|| (value.to_string(), key.trim().to_string()))
            }
            None => Some((entry.to_string(), entry.to_string())),
        })
        .collect()
}

/// Returns the member name and whether it is callable.
fn object_member(line: &str) -> Option<(String, bool)> {
    let caps = OBJECT_MEMBER.captures(line)?;
    let name = caps[1].to_string();
    if KEYWORDS.contains(&name.as_str()) {
        return None;
    }
    let is_method = match &caps[2] {
        "(" => true,
        ":" => {
            let value = caps[3].trim();
            value.starts_with("function") || FUNCTION_EXPR.is_match(value)
        }
        _ => false,
    };
    Some((name, is_method))
}

fn brace_delta(line: &str) -> i32 {
    line.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

/// Lexical state carried from one line to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexical {
    Code,
    BlockComment,
    Template,
}

/// Keywords after which `/` starts a regular expression rather than a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "yield", "await", "in", "of", "delete", "void", "throw", "else",
    "do",
];

/// Removes comments and blanks literal contents, keeping line structure.
fn clean_source(content: &str) -> Vec<String> {
    let mut state = Lexical::Code;
    content
        .lines()
        .map(|line| clean_line(line, &mut state))
        .collect()
}

fn clean_line(line: &str, state: &mut Lexical) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match *state {
            Lexical::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    *state = Lexical::Code;
                }
                continue;
            }
            Lexical::Template => {
                if c == '\\' {
                    chars.next();
                } else if c == '`' {
                    out.push(c);
                    *state = Lexical::Code;
                }
                continue;
            }
            Lexical::Code => {}
        }
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                out.push(c);
                quote = None;
            }
            continue;
        }
        match c {
            '/' if chars.peek() == Some(&'/') => break,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                *state = Lexical::BlockComment;
            }
            '/' if starts_regex(&out) => {
                skip_regex_body(&mut chars);
                out.push_str("/ /");
            }
            '`' => {
                out.push(c);
                *state = Lexical::Template;
            }
            '\'' | '"' => {
                out.push(c);
                quote = Some(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Whether a `/` following `before` on the same line opens a regex literal.
fn starts_regex(before: &str) -> bool {
    let before = before.trim_end();
    let Some(last) = before.chars().last() else {
        return true;
    };
    if "(,=:[!&|?{};+-*%~^".contains(last) {
        return true;
    }
    let word_len: usize = before
        .chars()
        .rev()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '$'))
        .map(char::len_utf8)
        .sum();
    REGEX_PREFIX_KEYWORDS.contains(&&before[before.len() - word_len..])
}

/// Consumes a regex literal body up to its closing `/`, ignoring `/` in classes.
fn skip_regex_body(chars: &mut Peekable<Chars<'_>>) {
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => return,
            _ => {}
        }
    }
}
