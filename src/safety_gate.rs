//! Pre-execution inspection of submitted strategy source.
//!
//! [`scan`] is a purely static deny-list pass over the raw text: it rejects
//! sources that try to spawn processes, touch files, invoke a code-evaluation
//! primitive or write to the console, and it rejects every import except the
//! single allowed `import random` line.
//!
//! This is a cheap pre-filter against *accidental* misuse and noisy output,
//! not a security boundary. Real containment comes from the deadline enforced
//! by the [`isolation`](crate::isolation) module and from the external
//! isolation host; do not rely on the deny-list for anything stronger.

use tracing::debug;

/// The only import a submission may contain.
pub const ALLOWED_IMPORT: &str = "random";

/// Text fragments that cause immediate denial, with the policy they violate.
const DENIED_FRAGMENTS: &[(&str, &str)] = &[
    ("system(", "spawning a shell"),
    ("subprocess", "spawning a process"),
    ("popen", "spawning a process"),
    ("open(", "opening file handles"),
    ("eval(", "invoking a code-evaluation primitive"),
    ("exec(", "invoking a code-evaluation primitive"),
    ("compile(", "invoking a code-evaluation primitive"),
    ("__import__", "invoking a code-evaluation primitive"),
    ("print(", "emitting console output"),
];

/// Verdict of a [`scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// The source may be handed to the strategy loader.
    Allowed,
    /// The source must be discarded. The reason is safe to echo back to the
    /// submitter.
    Denied {
        /// Why the source was denied.
        reason: String,
    },
}

impl Scan {
    /// True for [`Scan::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Scan::Allowed)
    }
}

/// Statically inspects `source` and returns a verdict. Never executes the
/// candidate code and never fails; a malformed source is simply denied.
///
/// Checks are case-sensitive substring/keyword matches applied before any
/// parsing, in two passes: the deny-list fragments, then the import rule
/// (at most one import, and it must be `import random`).
pub fn scan(source: &str) -> Scan {
    for (fragment, policy) in DENIED_FRAGMENTS {
        if source.contains(fragment) {
            debug!(fragment, "submission denied");
            return Scan::Denied {
                reason: format!("'{fragment}' is not allowed: {policy}"),
            };
        }
    }

    let mut imports = 0usize;
    for line in source.lines() {
        let line = line.trim_start();
        let name = if let Some(rest) = line.strip_prefix("import ") {
            rest.trim()
        } else if line.strip_prefix("from ").is_some() {
            // `from x import y` style smuggling counts as an import too
            line
        } else {
            continue;
        };

        imports += 1;
        if imports > 1 {
            return Scan::Denied {
                reason: "more than one import statement (only 'import random' is allowed)"
                    .to_string(),
            };
        }
        if name != ALLOWED_IMPORT {
            return Scan::Denied {
                reason: format!(
                    "disallowed import '{name}' (only 'import {ALLOWED_IMPORT}' is allowed)"
                ),
            };
        }
    }

    Scan::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_minimal_strategy() {
        assert!(scan("strategy Banker(Player):\n    bank\n").is_allowed());
    }

    #[test]
    fn allows_the_random_import() {
        let src = "import random\nstrategy Coin(Player):\n    if rand(2) == 0 then bank else roll\n";
        assert!(scan(src).is_allowed());
    }

    #[test]
    fn denies_import_os_with_reason_naming_it() {
        let verdict = scan("import os\nstrategy Evil(Player):\n    bank\n");
        match verdict {
            Scan::Denied { reason } => assert!(reason.contains("os"), "reason was: {reason}"),
            Scan::Allowed => panic!("import os must be denied"),
        }
    }

    #[test]
    fn denies_second_import_even_if_random() {
        let verdict = scan("import random\nimport random\nstrategy S(Player):\n    roll\n");
        assert!(!verdict.is_allowed());
    }

    #[test]
    fn denies_from_style_import() {
        assert!(!scan("from random import randint\nstrategy S(Player):\n    roll\n").is_allowed());
    }

    #[test]
    fn denies_escape_fragments() {
        for bad in ["eval(x)", "open('/etc/passwd')", "os.system('rm')", "print(1)"] {
            let src = format!("strategy S(Player):\n    roll\n# {bad}\n");
            assert!(!scan(&src).is_allowed(), "{bad} should be denied");
        }
    }
}
