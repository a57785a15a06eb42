//! Instruction guard: flags denylisted Dockerfile directives.
//!
//! The guard only looks at directive keywords. Whether a finding blocks the
//! build is decided by [`GuardPolicy`].

use crate::builder::parser::parse_directives;
use crate::config::GuardPolicy;
use crate::error::{ArenaError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Forbidden directives found in one build file.
///
/// Maps the directive keyword to the 1-based line numbers it appears on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForbiddenInstructionReport {
    pub occurrences: BTreeMap<String, Vec<usize>>,
}

impl ForbiddenInstructionReport {
    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Names of the forbidden directives, sorted.
    pub fn names(&self) -> Vec<String> {
        self.occurrences.keys().cloned().collect()
    }

    /// Total number of forbidden directive lines.
    pub fn count(&self) -> usize {
        self.occurrences.values().map(Vec::len).sum()
    }

    /// Iterate `(keyword, line)` pairs in keyword then line order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.occurrences
            .iter()
            .flat_map(|(name, lines)| lines.iter().map(move |line| (name.as_str(), *line)))
    }
}

/// Scans build files against a fixed denylist.
#[derive(Debug, Clone)]
pub struct InstructionGuard {
    denylist: BTreeSet<String>,
    policy: GuardPolicy,
}

impl InstructionGuard {
    /// Create a guard for the given keywords (matched case-insensitively).
    pub fn new<I, S>(denylist: I, policy: GuardPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denylist: denylist.into_iter().map(|s| s.as_ref().trim().to_uppercase()).collect(),
            policy,
        }
    }

    pub fn policy(&self) -> GuardPolicy {
        self.policy
    }

    /// Scan raw build-file bytes. Invalid UTF-8 is replaced, not rejected.
    pub fn scan(&self, content: &[u8]) -> ForbiddenInstructionReport {
        let text = String::from_utf8_lossy(content);
        let mut report = ForbiddenInstructionReport::default();

        for directive in parse_directives(&text) {
            if self.denylist.contains(&directive.keyword) {
                warn!(
                    instruction = %directive.keyword,
                    line = directive.line,
                    "Forbidden instruction"
                );
                report.occurrences.entry(directive.keyword).or_default().push(directive.line);
            }
        }

        report
    }

    /// Apply the policy to a report.
    ///
    /// Under [`GuardPolicy::Warn`] this always succeeds; under
    /// [`GuardPolicy::Deny`] any finding fails with `ForbiddenInstructions`.
    pub fn enforce(&self, report: &ForbiddenInstructionReport) -> Result<()> {
        match self.policy {
            GuardPolicy::Warn => Ok(()),
            GuardPolicy::Deny if report.is_empty() => Ok(()),
            GuardPolicy::Deny => Err(ArenaError::ForbiddenInstructions { names: report.names() }),
        }
    }
}
