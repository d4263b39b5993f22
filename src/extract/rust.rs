//! Export extraction for Rust source files.
//!
//! Only bare `pub` items at the top level of a file count as exports. Inherent
//! and trait `impl` blocks are folded into the type they target, which may be
//! declared before or after the impl.

use super::{
    AccessKind, ExportDescriptor, ExtractionFailure, LanguageExtractor, parenthesized,
    required_params, simple_type_name,
};
use crate::candidate::Candidate;
use crate::signature::{EntityKind, Signature, decorator_name};
use ahash::AHashMap;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

static ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^pub\s+(?:(?:async|const|unsafe|extern(?:\s+"[^"]*")?)\s+)*(struct|enum|trait|fn|const|static|type|mod)\s+([A-Za-z_]\w*)"#,
    )
    .expect("valid regex")
});

static SUPERTRAITS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"trait\s+\w+(?:<[^>]*>)?\s*:\s*([^{]+?)\s*(?:\bwhere\b|\{|$)").expect("valid regex")
});

static IMPL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:unsafe\s+)?impl\b(?:\s*<[^{]*?>)?\s+(?:(!?[\w:]+)(?:<[^{]*?>)?\s+for\s+)?([\w:]+)",
    )
    .expect("valid regex")
});

static FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pub\s+([A-Za-z_]\w*)\s*:").expect("valid regex"));

static VARIANT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]\w*)\s*(?:[({,=]|$)").expect("valid regex"));

static FN_MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(pub(?:\([^)]*\))?\s+)?(?:(?:async|const|unsafe|extern(?:\s+"[^"]*")?)\s+)*fn\s+([A-Za-z_]\w*)"#,
    )
    .expect("valid regex")
});

static DERIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\[derive\(([^)]*)\)\]").expect("valid regex"));

/// Extractor for `.rs` files.
#[derive(Debug, Clone)]
pub struct RustExtractor {
    extensions: Vec<String>,
}

impl RustExtractor {
    pub fn new() -> Self {
        Self {
            extensions: vec!["rs".to_string()],
        }
    }
}

impl Default for RustExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageExtractor for RustExtractor {
    fn language(&self) -> &str {
        "rust"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn extract(
        &self,
        _path: &Path,
        content: &str,
    ) -> Result<Vec<ExportDescriptor>, ExtractionFailure> {
        let lines = clean_source(content);
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let mut parser = FileParser::default();
        parser.run(&lines)?;
        Ok(parser.finish())
    }

    fn language_score(&self, candidate: &Candidate, _signature: &Signature) -> f64 {
        if candidate.file_name == "build.rs" {
            -20.0
        } else if candidate.relative_path.contains("src/bin/") || candidate.file_name == "main.rs" {
            -5.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
enum Block {
    Struct(usize),
    Enum(usize),
    Trait(usize),
    Impl { target: String, trait_name: Option<String> },
    Other,
}

/// Members contributed by `impl` blocks, keyed by target type.
#[derive(Debug, Default)]
struct ImplMembers {
    methods: BTreeSet<String>,
    implements: Vec<String>,
    arity: Option<usize>,
}

#[derive(Debug, Default)]
struct FileParser {
    items: Vec<ExportDescriptor>,
    impls: AHashMap<String, ImplMembers>,
    block: Option<Block>,
    derives_default: bool,
    /// Outer attributes waiting for the item they annotate.
    attributes: Vec<String>,
}

impl FileParser {
    fn run(&mut self, lines: &[&str]) -> Result<(), ExtractionFailure> {
        let mut depth = 0i32;
        for (index, raw) in lines.iter().enumerate() {
            let line = raw.trim();
            if depth == 0 {
                self.block = None;
                if !line.is_empty() {
                    self.top_level(line);
                }
            } else if depth == 1
                && !line.is_empty()
                && let Some(block) = self.block.clone()
            {
                self.member(&block, line, lines, index);
            }

            depth += line.chars().fold(0, |acc, c| match c {
                '{' => acc + 1,
                '}' => acc - 1,
                _ => acc,
            });
            if depth < 0 {
                return Err(ExtractionFailure::Parse {
                    line: index + 1,
                    message: "unbalanced closing brace".to_string(),
                });
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Vec<ExportDescriptor> {
        for item in &mut self.items {
            let Some(members) = self.impls.remove(&item.name) else {
                continue;
            };
            item.methods.extend(members.methods);
            item.implements.extend(members.implements);
            item.constructor_arity = match (item.constructor_arity, members.arity) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        self.items
    }

    fn top_level(&mut self, line: &str) {
        if line.starts_with("#[") {
            if let Some(caps) = DERIVE.captures(line) {
                self.derives_default |= caps[1].split(',').any(|d| d.trim() == "Default");
            }
            self.attributes.push(decorator_name(line));
            return;
        }
        if line.starts_with("//") {
            return;
        }
        let derives_default = std::mem::take(&mut self.derives_default);
        let attributes = std::mem::take(&mut self.attributes);

        if let Some(caps) = ITEM.captures(line) {
            let name = caps[2].to_string();
            let (kind, block) = match &caps[1] {
                "struct" => (EntityKind::Class, Some(Block::Struct(self.items.len()))),
                "enum" => (EntityKind::Enum, Some(Block::Enum(self.items.len()))),
                "trait" => (EntityKind::Interface, Some(Block::Trait(self.items.len()))),
                "fn" => (EntityKind::Function, None),
                "mod" => (EntityKind::Module, Some(Block::Other)),
                _ => (EntityKind::Object, None),
            };
            let mut descriptor = ExportDescriptor::new(AccessKind::Named, &name, kind, &name);
            descriptor.decorators = attributes.into_iter().collect();
            match &caps[1] {
                "struct" if derives_default || line.ends_with(';') && !line.contains('(') => {
                    descriptor.constructor_arity = Some(0);
                }
                "trait" => {
                    let supertraits: Vec<String> = SUPERTRAITS
                        .captures(line)
                        .map(|c| {
                            c[1].split('+')
                                .map(|s| simple_type_name(s).to_string())
                                .filter(|s| !s.is_empty() && !s.starts_with('\''))
                                .collect()
                        })
                        .unwrap_or_default();
                    descriptor.extends = supertraits.first().cloned();
                    descriptor.implements = supertraits.into_iter().skip(1).collect();
                }
                _ => {}
            }
            self.items.push(descriptor);
            self.block = block;
            return;
        }

        if let Some(caps) = IMPL.captures(line) {
            let target = simple_type_name(&caps[2]).to_string();
            let trait_name = caps
                .get(1)
                .filter(|t| !t.as_str().starts_with('!'))
                .map(|t| simple_type_name(t.as_str()).to_string());
            if let Some(trait_name) = &trait_name {
                let members = self.impls.entry(target.clone()).or_default();
                members.implements.push(trait_name.clone());
                if trait_name == "Default" {
                    members.arity = Some(0);
                }
            }
            self.block = Some(Block::Impl { target, trait_name });
            return;
        }

        self.block = Some(Block::Other);
    }

    fn member(&mut self, block: &Block, line: &str, lines: &[&str], index: usize) {
        match block {
            Block::Struct(idx) => {
                if let Some(caps) = FIELD.captures(line) {
                    self.items[*idx].properties.insert(caps[1].to_string());
                }
            }
            Block::Enum(idx) => {
                if let Some(caps) = VARIANT.captures(line) {
                    self.items[*idx].properties.insert(caps[1].to_string());
                }
            }
            Block::Trait(idx) => {
                if let Some(caps) = FN_MEMBER.captures(line) {
                    self.items[*idx].methods.insert(caps[2].to_string());
                }
            }
            Block::Impl { target, trait_name } => {
                let Some(caps) = FN_MEMBER.captures(line) else {
                    return;
                };
                // Inherent items must be `pub` to be reachable from outside
                if trait_name.is_none() && caps.get(1).is_none_or(|v| v.as_str().trim() != "pub") {
                    return;
                }
                let name = caps[2].to_string();
                let members = self.impls.entry(target.clone()).or_default();
                if name == "new" && trait_name.is_none() {
                    let params = parenthesized(lines, index).unwrap_or_default();
                    let arity = required_params(&params, &[]);
                    members.arity = Some(members.arity.map_or(arity, |a| a.min(arity)));
                }
                members.methods.insert(name);
            }
            Block::Other => {}
        }
    }
}

/// Removes comments and blanks string and char literal contents.
fn clean_source(content: &str) -> Vec<String> {
    let mut in_block_comment = 0usize;
    let mut in_string = false;
    content
        .lines()
        .map(|line| {
            let chars: Vec<char> = line.chars().collect();
            let mut out = String::with_capacity(line.len());
            let mut i = 0;
            while i < chars.len() {
                let c = chars[i];
                let next = chars.get(i + 1).copied();
                if in_block_comment > 0 {
                    if c == '*' && next == Some('/') {
                        in_block_comment -= 1;
                        i += 1;
                    } else if c == '/' && next == Some('*') {
                        in_block_comment += 1;
                        i += 1;
                    }
                } else if in_string {
                    if c == '\\' {
                        i += 1;
                    } else if c == '"' {
                        out.push('"');
                        in_string = false;
                    }
                } else {
                    match (c, next) {
                        ('/', Some('/')) => break,
                        ('/', Some('*')) => {
                            in_block_comment += 1;
                            i += 1;
                        }
                        ('"', _) => {
                            out.push('"');
                            in_string = true;
                        }
                        // Char literals; a lone quote is a lifetime
                        ('\'', Some('\\')) => {
                            let close = chars[i + 2..].iter().position(|&ch| ch == '\'');
                            out.push_str("' '");
                            i += close.map_or(1, |p| p + 2);
                        }
                        ('\'', Some(_)) if chars.get(i + 2) == Some(&'\'') => {
                            out.push_str("' '");
                            i += 2;
                        }
                        _ => out.push(c),
                    }
                }
                i += 1;
            }
            out
        })
        .collect()
}
