use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub type FeState = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state base {0} not found")]
    MissingBase(String),
    #[error("diffhash[{index}]:{hash} does not exist")]
    MissingDiff { index: usize, hash: String },
    #[error("state decode error: {0}")]
    Decode(String),
}

/// Pointer to a resolvable shell state: a base plus an ordered diff chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellStatePtr {
    #[serde(rename = "basehash")]
    pub base_hash: String,
    #[serde(rename = "diffhasharr", default, skip_serializing_if = "Vec::is_empty")]
    pub diff_hash_arr: Vec<String>,
}

impl ShellStatePtr {
    pub fn new(base_hash: impl Into<String>) -> Self {
        Self {
            base_hash: base_hash.into(),
            diff_hash_arr: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base_hash.is_empty()
    }
}

/// A captured shell environment. `version` is of the form
/// `"<shell> v<semver>"`; `vars` holds the exported and local declarations,
/// `aliases`/`funcs` the raw alias and function blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellState {
    pub version: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aliases: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub funcs: String,
}

impl ShellState {
    /// Shell name parsed from the version string ("bash v5.2.15" -> "bash").
    pub fn shell_type(&self) -> &str {
        self.version
            .split_whitespace()
            .next()
            .unwrap_or_default()
    }

    /// Canonical byte encoding. BTreeMap keys give a deterministic order, so
    /// equal states always produce identical bytes (and identical hashes).
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("shell state serialization cannot fail")
    }

    pub fn decode(data: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(data).map_err(|err| StateError::Decode(err.to_string()))
    }

    pub fn encode_and_hash(&self) -> (String, Vec<u8>) {
        let data = self.encode();
        (content_hash(&data), data)
    }
}

/// One var mutation inside a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum VarDiffOp {
    Set { name: String, value: String },
    Unset { name: String },
}

/// A delta against a base state (or against a prior diff chain ending at
/// `diff_hash_arr.last()`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellStateDiff {
    pub version: String,
    #[serde(rename = "basehash")]
    pub base_hash: String,
    #[serde(rename = "diffhasharr", default, skip_serializing_if = "Vec::is_empty")]
    pub diff_hash_arr: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(rename = "varops", default, skip_serializing_if = "Vec::is_empty")]
    pub var_ops: Vec<VarDiffOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funcs: Option<String>,
}

impl ShellStateDiff {
    pub fn shell_type(&self) -> &str {
        self.version
            .split_whitespace()
            .next()
            .unwrap_or_default()
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("shell state diff serialization cannot fail")
    }

    pub fn decode(data: &[u8]) -> Result<Self, StateError> {
        serde_json::from_slice(data).map_err(|err| StateError::Decode(err.to_string()))
    }

    pub fn encode_and_hash(&self) -> (String, Vec<u8>) {
        let data = self.encode();
        (content_hash(&data), data)
    }
}

/// 64-bit content hash: the first 8 bytes of SHA-256 over the canonical
/// encoding, hex encoded.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Fold a diff into a state. Version follows the diff when it carries one.
pub fn apply_shell_state_diff(state: &ShellState, diff: &ShellStateDiff) -> ShellState {
    let mut rtn = state.clone();
    if !diff.version.is_empty() {
        rtn.version = diff.version.clone();
    }
    if let Some(cwd) = &diff.cwd {
        rtn.cwd = cwd.clone();
    }
    for op in &diff.var_ops {
        match op {
            VarDiffOp::Set { name, value } => {
                rtn.vars.insert(name.clone(), value.clone());
            }
            VarDiffOp::Unset { name } => {
                rtn.vars.remove(name);
            }
        }
    }
    if let Some(aliases) = &diff.aliases {
        rtn.aliases = aliases.clone();
    }
    if let Some(funcs) = &diff.funcs {
        rtn.funcs = funcs.clone();
    }
    rtn
}

/// Summary of the environment shown to the front end: cwd, active
/// virtualenv/conda env, and any prompt vars the shell integration exported.
pub fn fe_state_from_shell_state(state: &ShellState) -> FeState {
    let mut rtn = FeState::new();
    rtn.insert("cwd".to_owned(), state.cwd.clone());
    for key in ["VIRTUAL_ENV", "CONDA_DEFAULT_ENV"] {
        if let Some(value) = state.vars.get(key) {
            rtn.insert(key.to_owned(), value.clone());
        }
    }
    for (name, value) in &state.vars {
        if name.starts_with("PROMPTVAR_") {
            rtn.insert(name.clone(), value.clone());
        }
    }
    if state.version.is_empty() || state.shell_type().is_empty() {
        rtn.insert("invalidstate".to_owned(), "1".to_owned());
    }
    rtn
}

/// `state_base` row: content-addressed, immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBaseRow {
    pub base_hash: String,
    pub version: String,
    pub ts: i64,
    pub data: Vec<u8>,
}

/// `state_diff` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiffRow {
    pub diff_hash: String,
    pub ts: i64,
    pub base_hash: String,
    pub diff_hash_arr: Vec<String>,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> ShellState {
        let mut vars = BTreeMap::new();
        vars.insert("HOME".to_owned(), "/home/user".to_owned());
        vars.insert("PATH".to_owned(), "/usr/bin:/bin".to_owned());
        ShellState {
            version: "bash v5.2.15".to_owned(),
            cwd: "/home/user".to_owned(),
            vars,
            aliases: "alias ll='ls -l'\n".to_owned(),
            funcs: String::new(),
        }
    }

    #[test]
    fn content_hash_is_deterministic_and_64_bit() {
        let state = sample_state();
        let (hash_a, data_a) = state.encode_and_hash();
        let (hash_b, data_b) = state.clone().encode_and_hash();
        assert_eq!(hash_a, hash_b);
        assert_eq!(data_a, data_b);
        assert_eq!(hash_a.len(), 16);
    }

    #[test]
    fn hash_changes_with_content() {
        let state = sample_state();
        let mut other = state.clone();
        other.cwd = "/tmp".to_owned();
        assert_ne!(state.encode_and_hash().0, other.encode_and_hash().0);
    }

    #[test]
    fn encode_round_trips() {
        let state = sample_state();
        let decoded = ShellState::decode(&state.encode()).expect("decode state");
        assert_eq!(decoded, state);
    }

    #[test]
    fn diff_application_sets_and_unsets_vars() {
        let state = sample_state();
        let diff = ShellStateDiff {
            version: "bash v5.2.15".to_owned(),
            base_hash: state.encode_and_hash().0,
            cwd: Some("/srv".to_owned()),
            var_ops: vec![
                VarDiffOp::Set {
                    name: "VIRTUAL_ENV".to_owned(),
                    value: "/venv".to_owned(),
                },
                VarDiffOp::Unset {
                    name: "PATH".to_owned(),
                },
            ],
            ..Default::default()
        };

        let next = apply_shell_state_diff(&state, &diff);
        assert_eq!(next.cwd, "/srv");
        assert_eq!(next.vars.get("VIRTUAL_ENV").map(String::as_str), Some("/venv"));
        assert!(!next.vars.contains_key("PATH"));
        assert_eq!(next.vars.get("HOME"), state.vars.get("HOME"));
    }

    #[test]
    fn fe_state_includes_cwd_env_markers_and_prompt_vars() {
        let mut state = sample_state();
        state
            .vars
            .insert("VIRTUAL_ENV".to_owned(), "/venv".to_owned());
        state
            .vars
            .insert("PROMPTVAR_GITBRANCH".to_owned(), "main".to_owned());

        let fe = fe_state_from_shell_state(&state);
        assert_eq!(fe.get("cwd").map(String::as_str), Some("/home/user"));
        assert_eq!(fe.get("VIRTUAL_ENV").map(String::as_str), Some("/venv"));
        assert_eq!(
            fe.get("PROMPTVAR_GITBRANCH").map(String::as_str),
            Some("main")
        );
        assert!(!fe.contains_key("invalidstate"));
    }

    #[test]
    fn fe_state_flags_missing_version() {
        let mut state = sample_state();
        state.version = String::new();
        let fe = fe_state_from_shell_state(&state);
        assert_eq!(fe.get("invalidstate").map(String::as_str), Some("1"));
    }
}
