//! Run configuration.
//!
//! A config file is TOML with one `[river_core]` table, an optional
//! `[coverage]` table and one table per named plugin:
//!
//! ```toml
//! [river_core]
//! isa = "rv64imac"
//! work_dir = "/tmp/river"
//! generator = "aapg"
//! target = "chromite"
//! reference = "spike"
//! path_to_suite = "plugins/generators"
//! path_to_target = "plugins/duts"
//! path_to_ref = "plugins/references"
//!
//! [aapg]
//! jobs = 8
//! count = 2
//!
//! [chromite]
//! jobs = 8
//! count = 1
//!
//! [spike]
//! jobs = 8
//! count = 1
//! ```
//!
//! Plugin lists accept a comma-separated string or an array; an empty
//! string means "none configured". The validated [`Config`] is immutable.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use river_plugin::{Capability, ParamBag, PluginConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the top-level table.
pub const TOP_SECTION: &str = "river_core";

/// Name of the optional coverage table.
pub const COVERAGE_SECTION: &str = "coverage";

/// Keys every plugin table must carry.
pub const REQUIRED_PLUGIN_KEYS: [&str; 2] = ["jobs", "count"];

/// The file as written, before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    river_core: Option<RawRiverCore>,
    coverage: Option<BTreeMap<String, ParamValue>>,
    /// Every other table: one per plugin.
    #[serde(flatten)]
    sections: BTreeMap<String, BTreeMap<String, ParamValue>>,
}

#[derive(Debug, Deserialize)]
struct RawRiverCore {
    isa: String,
    work_dir: PathBuf,
    generator: PluginList,
    target: PluginList,
    reference: PluginList,
    #[serde(default)]
    path_to_suite: Option<PathBuf>,
    #[serde(default)]
    path_to_target: Option<PathBuf>,
    #[serde(default)]
    path_to_ref: Option<PathBuf>,
    #[serde(default)]
    parallel_dispatch: bool,
    #[serde(flatten)]
    extra: BTreeMap<String, ParamValue>,
}

/// `"a, b"`, `["a", "b"]` and `""` are all accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PluginList {
    Joined(String),
    Items(Vec<String>),
}

impl PluginList {
    fn into_names(self, key: &str) -> Result<Vec<String>, ConfigError> {
        let names: Vec<String> = match self {
            PluginList::Joined(s) => s.split(',').map(|n| n.trim().to_string()).collect(),
            PluginList::Items(items) => items.into_iter().map(|n| n.trim().to_string()).collect(),
        };

        let mut out: Vec<String> = Vec::new();
        for name in names.into_iter().filter(|n| !n.is_empty()) {
            if out.contains(&name) {
                return Err(invalid(TOP_SECTION, key, format!("plugin `{name}` listed twice")));
            }
            out.push(name);
        }
        Ok(out)
    }
}

/// A scalar from a plugin or coverage table. Plugins receive it as text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Other(toml::Value),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Integer(n) => write!(f, "{n}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Boolean(b) => write!(f, "{b}"),
            ParamValue::Other(v) => write!(f, "{v}"),
        }
    }
}

fn into_bag(table: BTreeMap<String, ParamValue>) -> ParamBag {
    table.into_iter().map(|(k, v)| (k, v.to_string())).collect()
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    isa: String,
    work_dir: PathBuf,
    generators: Vec<String>,
    duts: Vec<String>,
    references: Vec<String>,
    path_to_suite: Option<PathBuf>,
    path_to_target: Option<PathBuf>,
    path_to_ref: Option<PathBuf>,
    parallel_dispatch: bool,
    coverage: bool,
    coverage_config: Option<ParamBag>,
    /// Keys of `[river_core]` not modelled above, stringified.
    extra: ParamBag,
    plugins: BTreeMap<String, ParamBag>,
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate config text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let RawConfig {
            river_core,
            coverage,
            mut sections,
        } = toml::from_str(raw)?;
        let top = river_core.ok_or_else(|| ConfigError::MissingSection(TOP_SECTION.to_string()))?;

        let isa = top.isa.trim().to_string();
        if isa.is_empty() {
            return Err(invalid(TOP_SECTION, "isa", "must not be empty"));
        }
        if top.work_dir.as_os_str().is_empty() {
            return Err(invalid(TOP_SECTION, "work_dir", "must not be empty"));
        }

        let generators = top.generator.into_names("generator")?;
        let duts = top.target.into_names("target")?;
        let references = top.reference.into_names("reference")?;

        let non_empty = |p: Option<PathBuf>| p.filter(|p| !p.as_os_str().is_empty());
        let path_to_suite = non_empty(top.path_to_suite);
        let path_to_target = non_empty(top.path_to_target);
        let path_to_ref = non_empty(top.path_to_ref);

        for (list, key, path) in [
            (&generators, "path_to_suite", &path_to_suite),
            (&duts, "path_to_target", &path_to_target),
            (&references, "path_to_ref", &path_to_ref),
        ] {
            if !list.is_empty() && path.is_none() {
                return Err(ConfigError::MissingKey {
                    section: TOP_SECTION.to_string(),
                    key: key.to_string(),
                });
            }
        }

        let mut plugins = BTreeMap::new();
        for name in generators.iter().chain(&duts).chain(&references) {
            if plugins.contains_key(name) {
                continue;
            }
            let bag = sections
                .remove(name)
                .map(into_bag)
                .ok_or_else(|| ConfigError::MissingSection(name.clone()))?;
            for key in REQUIRED_PLUGIN_KEYS {
                let value = bag.get(key).ok_or_else(|| ConfigError::MissingKey {
                    section: name.clone(),
                    key: key.to_string(),
                })?;
                if value.trim().parse::<u32>().map_or(true, |n| n == 0) {
                    return Err(invalid(
                        name,
                        key,
                        format!("expected a positive integer, got `{value}`"),
                    ));
                }
            }
            plugins.insert(name.clone(), bag);
        }

        Ok(Self {
            isa,
            work_dir: top.work_dir,
            generators,
            duts,
            references,
            path_to_suite,
            path_to_target,
            path_to_ref,
            parallel_dispatch: top.parallel_dispatch,
            coverage: false,
            coverage_config: coverage.map(into_bag),
            extra: into_bag(top.extra),
            plugins,
        })
    }

    /// Enable or disable coverage. Enabling requires a `[coverage]` table.
    pub fn with_coverage(mut self, enabled: bool) -> Result<Self, ConfigError> {
        if enabled && self.coverage_config.is_none() {
            return Err(ConfigError::MissingSection(COVERAGE_SECTION.to_string()));
        }
        self.coverage = enabled;
        Ok(self)
    }

    pub fn isa(&self) -> &str {
        &self.isa
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn generators(&self) -> &[String] {
        &self.generators
    }

    pub fn duts(&self) -> &[String] {
        &self.duts
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn parallel_dispatch(&self) -> bool {
        self.parallel_dispatch
    }

    pub fn coverage(&self) -> bool {
        self.coverage
    }

    /// The `[coverage]` table, only when coverage is enabled.
    pub fn coverage_config(&self) -> Option<&ParamBag> {
        if self.coverage {
            self.coverage_config.as_ref()
        } else {
            None
        }
    }

    /// Plugin names configured for a capability.
    pub fn plugins_for(&self, capability: Capability) -> &[String] {
        match capability {
            Capability::Generator => &self.generators,
            Capability::Dut => &self.duts,
            Capability::Reference => &self.references,
        }
    }

    /// Plugin search path for a capability.
    pub fn search_path(&self, capability: Capability) -> Result<&Path, ConfigError> {
        let (path, key) = match capability {
            Capability::Generator => (&self.path_to_suite, "path_to_suite"),
            Capability::Dut => (&self.path_to_target, "path_to_target"),
            Capability::Reference => (&self.path_to_ref, "path_to_ref"),
        };
        path.as_deref().ok_or_else(|| ConfigError::MissingKey {
            section: TOP_SECTION.to_string(),
            key: key.to_string(),
        })
    }

    /// Build the configuration handed to one plugin: its own table plus the global ISA.
    pub fn plugin_config(&self, name: &str) -> Result<PluginConfig, ConfigError> {
        let bag = self
            .plugins
            .get(name)
            .ok_or_else(|| ConfigError::MissingSection(name.to_string()))?;
        let mut params = bag.clone();
        params.insert("isa".to_string(), self.isa.clone());
        Ok(PluginConfig {
            name: name.to_string(),
            isa: self.isa.clone(),
            params,
        })
    }

    /// Full configuration as JSON, for hooks that receive it wholesale.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[river_core]
isa = "rv64imac"
work_dir = "/tmp/river"
generator = "aapg"
target = "chromite, azurite"
reference = ["spike"]
path_to_suite = "plugins/generators"
path_to_target = "plugins/duts"
path_to_ref = "plugins/references"

[coverage]
code = true
functional = "false"

[aapg]
jobs = 8
count = 2
seed = "random"

[chromite]
jobs = 4
count = 1

[azurite]
jobs = "4"
count = 1

[spike]
jobs = 1
count = 1
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(FULL).unwrap();
        assert_eq!(config.isa(), "rv64imac");
        assert_eq!(config.work_dir(), Path::new("/tmp/river"));
        assert_eq!(config.generators(), ["aapg".to_string()]);
        assert_eq!(config.duts(), ["chromite".to_string(), "azurite".to_string()]);
        assert_eq!(config.references(), ["spike".to_string()]);
        assert_eq!(
            config.search_path(Capability::Dut).unwrap(),
            Path::new("plugins/duts")
        );
        assert!(!config.parallel_dispatch());
        assert!(!config.coverage());
        assert!(config.coverage_config().is_none());
    }

    #[test]
    fn test_plugin_config_merges_isa_without_mutating() {
        let config = Config::from_toml_str(FULL).unwrap();
        let pc = config.plugin_config("aapg").unwrap();
        assert_eq!(pc.isa, "rv64imac");
        assert_eq!(pc.get("seed"), Some("random"));
        assert_eq!(pc.get("jobs"), Some("8"));
        assert_eq!(pc.params.get("isa").map(String::as_str), Some("rv64imac"));

        // the stored section is untouched
        let again = Config::from_toml_str(FULL).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_missing_plugin_section_is_error() {
        let raw = FULL.replace("[spike]", "[not_spike]");
        let err = Config::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == "spike"));
    }

    #[test]
    fn test_missing_required_plugin_key() {
        let raw = FULL.replace("jobs = 4\ncount = 1", "jobs = 4");
        let err = Config::from_toml_str(&raw).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingKey { ref section, ref key } if section == "chromite" && key == "count")
        );
    }

    #[test]
    fn test_non_numeric_jobs_rejected() {
        let raw = FULL.replace("jobs = \"4\"", "jobs = \"many\"");
        let err = Config::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "jobs"));
    }

    #[test]
    fn test_missing_top_section() {
        let err = Config::from_toml_str("[aapg]\njobs = 1\ncount = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == TOP_SECTION));
    }

    #[test]
    fn test_empty_target_means_none() {
        let raw = FULL.replace("target = \"chromite, azurite\"", "target = \"\"");
        let config = Config::from_toml_str(&raw).unwrap();
        assert!(config.duts().is_empty());
        assert!(config.plugin_config("chromite").is_err());
    }

    #[test]
    fn test_search_path_required_for_configured_list() {
        let raw = FULL.replace("path_to_ref = \"plugins/references\"\n", "");
        let err = Config::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "path_to_ref"));
    }

    #[test]
    fn test_coverage_requires_section() {
        let config = Config::from_toml_str(FULL).unwrap().with_coverage(true).unwrap();
        let cov = config.coverage_config().unwrap();
        assert_eq!(cov.get("code").map(String::as_str), Some("true"));

        let raw = FULL.replace("[coverage]\ncode = true\nfunctional = \"false\"\n", "");
        let err = Config::from_toml_str(&raw)
            .unwrap()
            .with_coverage(true)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == COVERAGE_SECTION));
    }

    #[test]
    fn test_plugin_scalars_stringified() {
        let raw = FULL.replace("seed = \"random\"", "seed = 7\nratio = 0.5\nverbose = false\nflags = [\"-O2\"]");
        let pc = Config::from_toml_str(&raw).unwrap().plugin_config("aapg").unwrap();
        assert_eq!(pc.get("seed"), Some("7"));
        assert_eq!(pc.get("ratio"), Some("0.5"));
        assert_eq!(pc.get("verbose"), Some("false"));
        assert_eq!(pc.get("flags"), Some("[\"-O2\"]"));
    }

    #[test]
    fn test_wrong_type_and_empty_isa_rejected() {
        let raw = FULL.replace("isa = \"rv64imac\"", "isa = 64");
        assert!(matches!(Config::from_toml_str(&raw).unwrap_err(), ConfigError::Parse(_)));

        let raw = FULL.replace("isa = \"rv64imac\"", "isa = \" \"");
        let err = Config::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "isa"));
    }

    #[test]
    fn test_extra_top_level_keys_kept_in_json() {
        let raw = FULL.replace("isa = \"rv64imac\"", "isa = \"rv64imac\"\nproject = \"demo\"");
        let json = Config::from_toml_str(&raw).unwrap().to_json();
        assert_eq!(json["extra"]["project"], "demo");
        assert_eq!(json["isa"], "rv64imac");
    }

    #[test]
    fn test_duplicate_list_entry_rejected() {
        let raw = FULL.replace("target = \"chromite, azurite\"", "target = \"chromite,chromite\"");
        assert!(Config::from_toml_str(&raw).is_err());
    }
}
