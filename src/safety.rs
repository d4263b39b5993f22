//! Static denylist applied to raw candidate text before any load.
//!
//! This is a best-effort text scan, not a sandbox.

use crate::candidate::Candidate;
use anyhow::Context;
use regex::RegexSet;

/// A denylist pattern matched a candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("content matches denylist pattern `{pattern}`")]
pub struct UnsafeMatch {
    pub pattern: String,
}

/// Compiled set of dangerous call patterns.
#[derive(Debug, Clone)]
pub struct Denylist {
    patterns: RegexSet,
}

impl Denylist {
    pub fn new<I, S>(patterns: I) -> crate::error::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = RegexSet::new(patterns).context("Invalid denylist pattern")?;
        Ok(Self { patterns })
    }

    pub fn check(&self, candidate: &Candidate) -> Result<(), UnsafeMatch> {
        self.check_text(&candidate.content)
    }

    pub fn check_text(&self, content: &str) -> Result<(), UnsafeMatch> {
        match self.patterns.matches(content).iter().next() {
            Some(index) => Err(UnsafeMatch {
                pattern: self.patterns.patterns()[index].clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn is_safe(&self, candidate: &Candidate) -> bool {
        self.check(candidate).is_ok()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use assert2::{check, let_assert};
    use rstest::rstest;

    fn default_denylist() -> Denylist {
        Denylist::new(&DiscoveryConfig::default().denylist).unwrap()
    }

    #[rstest]
    #[case("process.exit(1);")]
    #[case("const cp = require('child_process');")]
    #[case("import { exec } from \"node:child_process\";")]
    #[case("execSync('ls')")]
    #[case("fs.rmSync(dir, { recursive: true })")]
    #[case("os.system('rm -rf /')")]
    #[case("subprocess.run(['ls'])")]
    #[case("shutil.rmtree(path)")]
    #[case("std::process::exit(1)")]
    #[case("std::fs::remove_dir_all(&dir)")]
    fn dangerous_calls_are_flagged(#[case] content: &str) {
        let_assert!(Err(found) = default_denylist().check_text(content));
        check!(!found.pattern.is_empty());
    }

    #[rstest]
    #[case("export class Calculator { add(a, b) { return a + b; } }")]
    #[case("def exit_code(self):\n    return 0")]
    #[case("// we never call process.exitCode here")]
    fn ordinary_code_is_safe(#[case] content: &str) {
        check!(default_denylist().check_text(content).is_ok());
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let_assert!(Err(_) = Denylist::new(["("]));
    }
}
