use crate::rsync::types::RunOptions;
use std::collections::BTreeSet;

/// Single-letter flags that `-a` stands for.
const ARCHIVE_EXPANSION: &str = "rlptgoD";

/// Long options that are spellings of a short flag.
const LONG_ALIASES: &[(&str, char)] = &[
    ("--recursive", 'r'),
    ("--links", 'l'),
    ("--perms", 'p'),
    ("--times", 't'),
    ("--group", 'g'),
    ("--owner", 'o'),
    ("--devices", 'D'),
    ("--specials", 'D'),
    ("--verbose", 'v'),
    ("--compress", 'z'),
    ("--human-readable", 'h'),
    ("--dry-run", 'n'),
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Effect {
    Flag(char),
    Long(String),
}

/// Builds rsync arguments from [`RunOptions`].
///
/// The result holds flags only; the caller appends sources and destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, options: &RunOptions) -> Vec<String> {
        let mut raw: Vec<&str> = Vec::new();

        if options.archive {
            // -a already carries -pgo, so preserve_permissions adds nothing.
            raw.push("-a");
        } else {
            raw.push("-rltD");
            if options.preserve_permissions {
                raw.push("-pgo");
            }
            raw.extend(["--atimes", "--crtimes", "--omit-dir-times"]);
        }

        if options.verbose {
            raw.push("-v");
        }
        if options.compress {
            raw.push("-z");
        }
        if options.human_readable {
            raw.push("-h");
        }
        if options.progress {
            raw.push("--progress");
        } else {
            raw.push("--info=progress2");
        }
        if options.delete {
            raw.push("--delete");
        }
        if options.dry_run {
            raw.push("-n");
        }

        dedupe_by_effect(&raw)
    }
}

/// Drops tokens whose effects are already present. Short bundles that
/// partly overlap keep only the new letters.
fn dedupe_by_effect(tokens: &[&str]) -> Vec<String> {
    let mut seen: BTreeSet<Effect> = BTreeSet::new();
    let mut out = Vec::with_capacity(tokens.len());

    for token in tokens {
        if let Some(letters) = short_bundle(token) {
            let mut fresh = String::new();
            for letter in letters.chars() {
                let implied: Vec<char> = if letter == 'a' {
                    ARCHIVE_EXPANSION.chars().collect()
                } else {
                    vec![letter]
                };
                let is_new = implied
                    .iter()
                    .any(|c| !seen.contains(&Effect::Flag(*c)));
                if is_new {
                    seen.extend(implied.into_iter().map(Effect::Flag));
                    fresh.push(letter);
                }
            }
            if !fresh.is_empty() {
                out.push(format!("-{fresh}"));
            }
            continue;
        }

        let effect = long_effect(token);
        if seen.insert(effect) {
            out.push(token.to_string());
        }
    }

    out
}

fn short_bundle(token: &str) -> Option<&str> {
    let letters = token.strip_prefix('-')?;
    if letters.is_empty() || letters.starts_with('-') {
        return None;
    }
    letters
        .chars()
        .all(|c| c.is_ascii_alphabetic())
        .then_some(letters)
}

fn long_effect(token: &str) -> Effect {
    if token == "--archive" {
        // Treated as its own effect; build() never emits it.
        return Effect::Long(token.to_string());
    }
    LONG_ALIASES
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, c)| Effect::Flag(*c))
        .unwrap_or_else(|| Effect::Long(token.to_string()))
}
