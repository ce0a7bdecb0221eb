//! TOML-based configuration for nodetree.
//!
//! A config file names the node repository, the merge and comparison
//! policies, and declares the node types stored in the repository. The
//! repository path can be overridden from an environment variable named in
//! `repository.path_env`; overrides are applied by
//! [`AppConfig::resolve_env_vars`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diff::ComparisonPolicy;
use crate::errors::ConfigError;
use crate::merge::{AddedUnderDeletedPolicy, ConflictStrategy, MergePolicy};
use crate::node::schema::RESERVED_PROPERTY_NAMES;
use crate::node::{NodeType, PropertyDescriptor, PropertyKind, Schema, ValueComparer};
use crate::serializer::JsonSerializer;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Node repository location.
    pub repository: RepositoryConfig,

    /// Conflict handling during merge and rebase.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Property comparison settings.
    #[serde(default)]
    pub comparison: ComparisonConfig,

    /// Node payload format.
    #[serde(default)]
    pub serializer: SerializerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Node types stored in the repository.
    #[serde(default)]
    pub node_types: Vec<NodeTypeConfig>,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the git repository holding the nodes.
    pub path: PathBuf,

    /// Branch used when a command does not name one (default "main").
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Environment variable that, when set, replaces `path`.
    #[serde(default)]
    pub path_env: Option<String>,
}

fn default_branch() -> String {
    "main".into()
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Automatic resolution applied to value conflicts.
    #[serde(default)]
    pub strategy: ConflictStrategy,

    /// Handling of nodes added under a node deleted on the other side.
    #[serde(default)]
    pub added_under_deleted: AddedUnderDeletedPolicy,
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Properties never reported as differences.
    #[serde(default)]
    pub ignored_properties: Vec<String>,

    /// Stop comparing a node after this many differences.
    #[serde(default)]
    pub max_differences: Option<usize>,
}

// ---------------------------------------------------------------------------
// Serializer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Write indented JSON (default true).
    #[serde(default = "default_true")]
    pub pretty: bool,

    /// Fail deserialization when a reference points at a missing node.
    #[serde(default)]
    pub verify_references: bool,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            verify_references: false,
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

/// Declaration of one node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    pub name: String,
    /// Folder name the type's nodes are stored under.
    pub folder: String,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(default)]
    pub kind: PropertyKind,
    /// Defaults to `unordered` for reference lists, `exact` otherwise.
    #[serde(default)]
    pub comparer: Option<ValueComparer>,
}

impl PropertyConfig {
    fn descriptor(&self) -> PropertyDescriptor {
        let descriptor = match self.kind {
            PropertyKind::Value => PropertyDescriptor::value(self.name.as_str()),
            PropertyKind::Reference => PropertyDescriptor::reference(self.name.as_str()),
            PropertyKind::ReferenceList => PropertyDescriptor::reference_list(self.name.as_str()),
        };
        match self.comparer {
            Some(comparer) => descriptor.with_comparer(comparer),
            None => descriptor,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** apply environment overrides -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(node_types = config.node_types.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// A referenced variable that is unset logs a warning and leaves the
    /// configured value in place.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.repository.path_env {
            if let Some(path) = resolve_optional_env(env_name, "repository.path_env") {
                info!(path = %path, "repository path overridden from environment");
                self.repository.path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.path".into(),
                detail: "repository path must not be empty".into(),
            });
        }
        if self.repository.default_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.default_branch".into(),
                detail: "default branch must not be empty".into(),
            });
        }
        if self.comparison.max_differences == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "comparison.max_differences".into(),
                detail: "max differences must be > 0".into(),
            });
        }
        if self.node_types.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "node_types".into(),
                detail: "at least one node type must be declared".into(),
            });
        }

        let mut names = HashSet::new();
        let mut folders = HashSet::new();
        for node_type in &self.node_types {
            if node_type.name.is_empty() || !names.insert(node_type.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "node_types.name".into(),
                    detail: format!("node type name '{}' is empty or duplicated", node_type.name),
                });
            }
            if node_type.folder.is_empty()
                || node_type.folder.contains('/')
                || !folders.insert(node_type.folder.as_str())
            {
                return Err(ConfigError::InvalidValue {
                    field: "node_types.folder".into(),
                    detail: format!(
                        "folder '{}' of '{}' is empty, nested or duplicated",
                        node_type.folder, node_type.name
                    ),
                });
            }
            for property in &node_type.properties {
                if property.name.is_empty()
                    || RESERVED_PROPERTY_NAMES.contains(&property.name.as_str())
                {
                    return Err(ConfigError::InvalidValue {
                        field: format!("node_types.{}.properties", node_type.name),
                        detail: format!("property name '{}' is empty or reserved", property.name),
                    });
                }
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the node schema from the declared node types.
    pub fn schema(&self) -> Result<Arc<Schema>, ConfigError> {
        let mut schema = Schema::new();
        for declared in &self.node_types {
            let node_type = declared
                .properties
                .iter()
                .fold(NodeType::new(declared.name.as_str(), declared.folder.as_str()), |t, p| {
                    t.with_property(p.descriptor())
                });
            schema.register(node_type)?;
        }
        Ok(Arc::new(schema))
    }

    pub fn comparison_policy(&self) -> ComparisonPolicy {
        self.comparison
            .ignored_properties
            .iter()
            .fold(ComparisonPolicy::new(), |policy, p| policy.ignore(p.as_str()))
            .with_max_differences(self.comparison.max_differences)
    }

    /// Merge policy with the configured comparison, strategy and
    /// added-under-deleted handling.
    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy::new()
            .with_comparison(self.comparison_policy())
            .with_strategy(self.merge.strategy)
            .with_added_under_deleted(self.merge.added_under_deleted)
    }

    pub fn serializer(&self) -> Result<JsonSerializer, ConfigError> {
        Ok(JsonSerializer::new(self.schema()?)
            .pretty(self.serializer.pretty)
            .verify_references(self.serializer.verify_references))
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
