//! SSH Config Parser
//!
//! Reads `~/.ssh/config` to find the identity files that apply to a host.
//! Only `Host` blocks and their `IdentityFile` directives matter here; every
//! other directive is ignored.
//!
//! # Pattern support
//!
//! A host pattern is either an exact name or contains exactly one `*`, placed
//! first (`*.example.com`, suffix match) or last (`192.168.1.*`, prefix match).
//! Interior wildcards, several wildcards and `?` never match.

use std::path::Path;
use tokio::fs;

/// One `Host` block of the config file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfigBlock {
    /// Patterns listed on the `Host` line
    pub patterns: Vec<String>,
    /// `IdentityFile` values, in file order, not yet tilde-expanded
    pub identity_files: Vec<String>,
}

impl SshConfigBlock {
    /// True when any of the block's patterns matches `host`
    pub fn matches(&self, host: &str) -> bool {
        self.patterns.iter().any(|p| match_host_pattern(p, host))
    }
}

/// SSH config parser errors
#[derive(Debug, thiserror::Error)]
pub enum SshConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Match a single `Host` pattern against a target host
pub fn match_host_pattern(pattern: &str, host: &str) -> bool {
    if pattern == host {
        return true;
    }

    if pattern.matches('*').count() != 1 {
        return false;
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        host.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        host.starts_with(prefix)
    } else {
        false
    }
}

/// Parse SSH config file; a missing file has no blocks
pub async fn parse_ssh_config(path: &Path) -> Result<Vec<SshConfigBlock>, SshConfigError> {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Vec::new());
        }
        Err(e) => return Err(SshConfigError::Io(e)),
    };

    Ok(parse_ssh_config_content(&content))
}

/// Parse SSH config content string
pub fn parse_ssh_config_content(content: &str) -> Vec<SshConfigBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<SshConfigBlock> = None;

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // "Key Value" or "Key=Value"
        let (key, value) = match split_directive(line) {
            Some(kv) => kv,
            None => continue,
        };

        match key.to_lowercase().as_str() {
            "host" => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                current = Some(SshConfigBlock {
                    patterns: value.split_whitespace().map(str::to_string).collect(),
                    identity_files: Vec::new(),
                });
            }
            // Match blocks use a different grammar; stop attributing lines to the previous Host
            "match" => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
            }
            "identityfile" => {
                if let Some(ref mut block) = current {
                    block.identity_files.push(unquote(value).to_string());
                }
            }
            _ => {}
        }
    }

    if let Some(block) = current {
        blocks.push(block);
    }

    blocks
}

/// Identity files of every block matching `host`, in file order
pub fn identity_files_for(blocks: &[SshConfigBlock], host: &str) -> Vec<String> {
    blocks
        .iter()
        .filter(|block| block.matches(host))
        .flat_map(|block| block.identity_files.iter().cloned())
        .collect()
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    let key_end = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let key = &line[..key_end];
    let rest = line[key_end..].trim_start();
    let value = rest.strip_prefix('=').unwrap_or(rest).trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
