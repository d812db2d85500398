//! Template variable generators.
//!
//! A generator turns the short `input` string of a job into the variable
//! mapping handed to the template renderer. Selectors (the `template_vars`
//! value of a settings record) are bound to generator kinds in the
//! `generators` configuration section.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::config::GeneratorsConfig;
use crate::error::{Error, Result};

/// Variable mapping passed to templates.
pub type Vars = BTreeMap<String, Value>;

/// Trust interfaces indexed by `seq - 1` for the interface generator.
const TRUST_INTERFACES: [u32; 8] = [2, 4, 6, 8, 10, 12, 14, 16];

/// Base autonomous system number, offset by the sequence number.
const AS_BASE: u32 = 65000;

/// Builds template variables from a job input string.
pub trait VarGenerator: Send + Sync {
    /// Generator kind as used in configuration
    fn kind(&self) -> &'static str;

    /// Produce the variable mapping for `input`
    fn generate(&self, selector: &str, input: &str) -> Result<Vars>;
}

fn parse_seq(selector: &str, input: &str) -> Result<u32> {
    input
        .trim()
        .parse()
        .map_err(|e| Error::invalid_input(selector, input, format!("{}", e)))
}

fn autonomous_system(selector: &str, input: &str, seq: u32) -> Result<u32> {
    AS_BASE.checked_add(seq).ok_or_else(|| {
        Error::invalid_input(
            selector,
            input,
            format!("sequence must not exceed {}", u32::MAX - AS_BASE),
        )
    })
}

/// `seq` and `aut_sys = 65000 + seq`.
#[derive(Debug, Default)]
pub struct SequenceGenerator;

impl VarGenerator for SequenceGenerator {
    fn kind(&self) -> &'static str {
        "sequence"
    }

    fn generate(&self, selector: &str, input: &str) -> Result<Vars> {
        let seq = parse_seq(selector, input)?;
        let aut_sys = autonomous_system(selector, input, seq)?;
        let mut vars = Vars::new();
        vars.insert("seq".into(), Value::from(seq.to_string()));
        vars.insert("aut_sys".into(), Value::from(aut_sys.to_string()));
        Ok(vars)
    }
}

/// Sequence variables plus the trust/untrust interface pair for `seq`.
#[derive(Debug, Default)]
pub struct InterfaceGenerator;

impl VarGenerator for InterfaceGenerator {
    fn kind(&self) -> &'static str {
        "interface"
    }

    fn generate(&self, selector: &str, input: &str) -> Result<Vars> {
        let seq = parse_seq(selector, input)?;
        let trust = (seq as usize)
            .checked_sub(1)
            .and_then(|i| TRUST_INTERFACES.get(i))
            .copied()
            .ok_or_else(|| {
                Error::invalid_input(
                    selector,
                    input,
                    format!("sequence must be within 1..={}", TRUST_INTERFACES.len()),
                )
            })?;
        let aut_sys = autonomous_system(selector, input, seq)?;

        let mut vars = Vars::new();
        vars.insert("seq".into(), Value::from(seq.to_string()));
        vars.insert("seq_0x".into(), Value::from(format!("{:02}", seq)));
        vars.insert("aut_sys".into(), Value::from(aut_sys.to_string()));
        vars.insert("trust_int".into(), Value::from(trust.to_string()));
        vars.insert("untrust_int".into(), Value::from((trust + 1).to_string()));
        Ok(vars)
    }
}

/// Exposes the raw input as `ip`.
#[derive(Debug, Default)]
pub struct PassthroughGenerator;

impl VarGenerator for PassthroughGenerator {
    fn kind(&self) -> &'static str {
        "passthrough"
    }

    fn generate(&self, _selector: &str, input: &str) -> Result<Vars> {
        let mut vars = Vars::new();
        vars.insert("ip".into(), Value::from(input));
        Ok(vars)
    }
}

/// Reads the YAML file named by the input and exposes its `list1` key.
#[derive(Debug, Default)]
pub struct YamlFileGenerator;

impl VarGenerator for YamlFileGenerator {
    fn kind(&self) -> &'static str {
        "yaml"
    }

    fn generate(&self, selector: &str, input: &str) -> Result<Vars> {
        let path = shellexpand::tilde(input.trim()).into_owned();
        let content = std::fs::read_to_string(Path::new(&path))
            .map_err(|e| Error::invalid_input(selector, input, e.to_string()))?;
        let data: Value = serde_yaml::from_str(&content)?;
        let list = data
            .get("list1")
            .cloned()
            .ok_or_else(|| Error::invalid_input(selector, input, "file has no 'list1' key"))?;

        let mut vars = Vars::new();
        vars.insert("list1".into(), list);
        Ok(vars)
    }
}

/// Selector -> generator lookup.
#[derive(Clone)]
pub struct VarRegistry {
    selectors: IndexMap<String, Arc<dyn VarGenerator>>,
}

impl VarRegistry {
    /// All built-in generator kinds
    pub fn builtin_kinds() -> Vec<Arc<dyn VarGenerator>> {
        vec![
            Arc::new(SequenceGenerator),
            Arc::new(InterfaceGenerator),
            Arc::new(PassthroughGenerator),
            Arc::new(YamlFileGenerator),
        ]
    }

    /// Bind the configured selectors to built-in generator kinds
    pub fn from_config(config: &GeneratorsConfig) -> Result<Self> {
        let kinds = Self::builtin_kinds();
        let mut selectors = IndexMap::new();

        for (kind, names) in &config.0 {
            let generator = kinds
                .iter()
                .find(|g| g.kind() == kind)
                .cloned()
                .ok_or_else(|| Error::InvalidConfig {
                    key: format!("generators.{}", kind),
                    message: "unknown generator kind".to_string(),
                })?;
            for name in names {
                selectors.insert(name.clone(), Arc::clone(&generator));
            }
        }

        Ok(Self { selectors })
    }

    /// Generate variables for `selector` with `input`
    pub fn generate(&self, selector: &str, input: &str) -> Result<Vars> {
        let generator = self
            .selectors
            .get(selector)
            .ok_or_else(|| Error::UnknownGenerator(selector.to_string()))?;
        generator.generate(selector, input)
    }

    /// Check if a selector is bound
    pub fn contains(&self, selector: &str) -> bool {
        self.selectors.contains_key(selector)
    }

    /// Bound selector names in configuration order
    pub fn selectors(&self) -> Vec<&str> {
        self.selectors.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for VarRegistry {
    fn default() -> Self {
        // The built-in configuration only names known kinds.
        Self::from_config(&GeneratorsConfig::default()).unwrap_or(Self {
            selectors: IndexMap::new(),
        })
    }
}

impl std::fmt::Debug for VarRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VarRegistry")
            .field("selectors", &self.selectors())
            .finish()
    }
}
