//! OpenSSH client configuration lookup
//!
//! Only the subset needed to resolve a host alias is understood: `Host`
//! sections with wildcard and negated patterns, and `keyword value` pairs.
//! Anything the parser does not recognise is skipped, so a malformed file
//! degrades to "no value" instead of failing the connection.

use std::path::Path;
use tracing::debug;

/// Default port, treated as "not configured" when found in a file
pub const DEFAULT_PORT: &str = "22";

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostPattern {
    negated: bool,
    glob: String,
}

impl HostPattern {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('!') {
            Some(rest) => Self {
                negated: true,
                glob: rest.to_ascii_lowercase(),
            },
            None => Self {
                negated: false,
                glob: raw.to_ascii_lowercase(),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Section {
    patterns: Vec<HostPattern>,
    /// `Match` blocks are never considered applicable
    conditional: bool,
    entries: Vec<(String, String)>,
}

impl Section {
    fn applies_to(&self, alias: &str) -> bool {
        if self.conditional {
            return false;
        }
        let alias = alias.to_ascii_lowercase();
        let mut matched = false;
        for pattern in &self.patterns {
            if glob_match(&pattern.glob, &alias) {
                if pattern.negated {
                    return false;
                }
                matched = true;
            }
        }
        matched
    }
}

/// A parsed ssh client configuration file
#[derive(Debug, Clone, Default)]
pub struct SshConfigFile {
    sections: Vec<Section>,
}

impl SshConfigFile {
    /// Parse configuration text, skipping lines that cannot be understood
    pub fn parse(text: &str) -> Self {
        // Options before the first `Host` line apply to every host.
        let mut sections = vec![Section {
            patterns: vec![HostPattern::parse("*")],
            ..Default::default()
        }];

        for line in text.lines() {
            let Some((keyword, value)) = split_line(line) else {
                continue;
            };
            match keyword.as_str() {
                "host" => sections.push(Section {
                    patterns: value.split_whitespace().map(HostPattern::parse).collect(),
                    ..Default::default()
                }),
                "match" => sections.push(Section {
                    conditional: true,
                    ..Default::default()
                }),
                _ => {
                    if let Some(current) = sections.last_mut() {
                        current.entries.push((keyword, value));
                    }
                }
            }
        }

        Self { sections }
    }

    /// Read and parse a file; a missing or unreadable file yields `None`
    pub fn load(path: &Path) -> Option<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Some(Self::parse(&text)),
            Err(e) => {
                debug!("Skipping ssh config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// First value of `key` that applies to `alias`
    pub fn get(&self, alias: &str, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.sections
            .iter()
            .filter(|section| section.applies_to(alias))
            .flat_map(|section| section.entries.iter())
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// User configuration layered over system configuration
#[derive(Debug, Clone, Default)]
pub struct SshSettings {
    files: Vec<SshConfigFile>,
}

impl SshSettings {
    /// Load every readable file, most specific first
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Self {
        Self {
            files: paths
                .iter()
                .filter_map(|p| SshConfigFile::load(p.as_ref()))
                .collect(),
        }
    }

    /// Build settings from already parsed files
    pub fn from_files(files: Vec<SshConfigFile>) -> Self {
        Self { files }
    }

    /// Look up `key` for `alias`; empty values count as unset
    pub fn get(&self, alias: &str, key: &str) -> Option<&str> {
        self.files
            .iter()
            .find_map(|file| file.get(alias, key))
            .filter(|v| !v.is_empty())
    }
}

fn split_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let split_at = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let keyword = line[..split_at].to_ascii_lowercase();
    let rest = line[split_at..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
    if rest.is_empty() {
        return None;
    }
    Some((keyword, rest.to_string()))
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
