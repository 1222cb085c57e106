//! Batch loader for stream bindings
//!
//! Reads YAML files listing the I/O channels of each codelet and turns them
//! into a [`LoadPlan`] (register packages, then bind streams) or an
//! [`UnloadPlan`] (unbind streams):
//!
//! ```yaml
//! codelet_descriptor:
//!   - in_io_channel:
//!       - stream_id: "00112233-4455-6677-8899-aabbccddeeff"
//!         serde:
//!           protobuf:
//!             package_path: ${SCHEMA_DIR}/example.pb
//!             msg_name: Status
//!     out_io_channel: []
//! ```
//!
//! `package_path` supports `${VAR}` and `${VAR:-default}`. The package name is
//! the file stem of the expanded path. One invalid channel rejects its whole
//! file; errors from every file are reported together.

use crate::error::{DecoderError, DecoderResult};
use crate::resolver::{instance_from_descriptor, DynamicInstance};
use crate::types::StreamId;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Expand `${VAR}` / `${VAR:-default}`; unset variables without a default
/// become empty
pub fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoaderDocument<C> {
    #[serde(default = "Vec::new")]
    codelet_descriptor: Vec<CodeletDescriptor<C>>,
}

#[derive(Debug, Deserialize)]
struct CodeletDescriptor<C> {
    #[serde(default = "Vec::new")]
    in_io_channel: Vec<C>,
    #[serde(default = "Vec::new")]
    out_io_channel: Vec<C>,
}

impl<C> CodeletDescriptor<C> {
    fn channels(&self) -> impl Iterator<Item = (&'static str, &C)> {
        self.in_io_channel
            .iter()
            .map(|c| ("in_io_channel", c))
            .chain(self.out_io_channel.iter().map(|c| ("out_io_channel", c)))
    }
}

#[derive(Debug, Deserialize)]
struct LoadChannel {
    #[serde(default)]
    stream_id: String,
    #[serde(default)]
    serde: Option<SerdeConfig>,
}

#[derive(Debug, Deserialize)]
struct SerdeConfig {
    #[serde(default)]
    protobuf: Option<ProtobufConfig>,
}

#[derive(Debug, Deserialize)]
struct ProtobufConfig {
    #[serde(default)]
    package_path: String,
    #[serde(default)]
    msg_name: String,
}

#[derive(Debug, Deserialize)]
struct UnloadChannel {
    #[serde(default)]
    stream_id: String,
}

// ============================================================================
// Plans
// ============================================================================

/// Descriptor bytes of one package plus the streams bound to it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageLoad {
    pub descriptor: Vec<u8>,
    /// Stream -> fully qualified message name
    pub streams: BTreeMap<StreamId, String>,
}

/// Packages to register and streams to bind, keyed by package name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    pub packages: BTreeMap<String, PackageLoad>,
}

impl LoadPlan {
    pub fn stream_count(&self) -> usize {
        self.packages.values().map(|p| p.streams.len()).sum()
    }

    /// Message instance for `stream` straight from the plan's descriptors,
    /// without going through a decoder's store
    pub fn build_instance(&self, stream: StreamId) -> DecoderResult<DynamicInstance> {
        let (package, load, message) = self
            .packages
            .iter()
            .find_map(|(name, load)| {
                let message = load.streams.get(&stream)?;
                Some((name, load, message))
            })
            .ok_or(DecoderError::StreamNotAssociated(stream))?;
        instance_from_descriptor(package, &load.descriptor, message)
    }
}

/// Streams to unbind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnloadPlan {
    pub streams: Vec<StreamId>,
}

struct Binding {
    package: String,
    path: PathBuf,
    stream: StreamId,
    message: String,
}

/// Build a [`LoadPlan`] from one or more loader files
pub fn load_plan_from_files<P: AsRef<Path>>(paths: &[P]) -> DecoderResult<LoadPlan> {
    let mut plan = LoadPlan::default();
    let mut descriptors: HashMap<PathBuf, Vec<u8>> = HashMap::new();
    let mut errors = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let document: LoaderDocument<LoadChannel> = match read_document(path) {
            Ok(document) => document,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        let mut bindings = Vec::new();
        let verified = document
            .codelet_descriptor
            .iter()
            .flat_map(|d| d.channels())
            .try_for_each(|(direction, channel)| {
                let binding = verify_load_channel(channel, &mut descriptors)
                    .map_err(|e| file_error(path, direction, e))?;
                bindings.push(binding);
                Ok::<(), DecoderError>(())
            });

        if let Err(e) = verified {
            errors.push(e);
            continue;
        }

        for binding in bindings {
            let descriptor = descriptors.get(&binding.path).cloned().unwrap_or_default();
            let package = plan.packages.entry(binding.package.clone()).or_default();
            if !package.streams.is_empty() && package.descriptor != descriptor {
                errors.push(DecoderError::Config(format!(
                    "package {} resolves to different descriptor files ({})",
                    binding.package,
                    binding.path.display()
                )));
                continue;
            }
            package.descriptor = descriptor;
            package.streams.insert(binding.stream, binding.message);
        }
    }

    finish(plan, errors)
}

/// Build an [`UnloadPlan`] from one or more loader files
pub fn unload_plan_from_files<P: AsRef<Path>>(paths: &[P]) -> DecoderResult<UnloadPlan> {
    let mut plan = UnloadPlan::default();
    let mut errors = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let document: LoaderDocument<UnloadChannel> = match read_document(path) {
            Ok(document) => document,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        let streams: DecoderResult<Vec<StreamId>> = document
            .codelet_descriptor
            .iter()
            .flat_map(|d| d.channels())
            .map(|(direction, channel)| {
                channel
                    .stream_id
                    .parse::<StreamId>()
                    .map_err(|e| file_error(path, direction, e))
            })
            .collect();

        match streams {
            Ok(streams) => {
                for stream in streams {
                    if !plan.streams.contains(&stream) {
                        plan.streams.push(stream);
                    }
                }
            }
            Err(e) => errors.push(e),
        }
    }

    finish(plan, errors)
}

fn read_document<C>(path: &Path) -> DecoderResult<LoaderDocument<C>>
where
    C: for<'de> Deserialize<'de>,
{
    let content = std::fs::read_to_string(path).map_err(|e| {
        DecoderError::Config(format!("failed to read file {}: {}", path.display(), e))
    })?;
    serde_yaml::from_str(&content).map_err(|e| {
        DecoderError::Config(format!("failed to parse file {}: {}", path.display(), e))
    })
}

fn verify_load_channel(
    channel: &LoadChannel,
    descriptors: &mut HashMap<PathBuf, Vec<u8>>,
) -> DecoderResult<Binding> {
    let stream: StreamId = channel.stream_id.parse()?;
    let protobuf = channel
        .serde
        .as_ref()
        .and_then(|s| s.protobuf.as_ref())
        .filter(|p| !p.package_path.is_empty())
        .ok_or_else(|| DecoderError::Config("missing required field package_path".to_string()))?;

    let path = PathBuf::from(expand_env_vars(&protobuf.package_path));
    let package = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DecoderError::Config(format!("invalid package_path {}", path.display())))?;

    if !descriptors.contains_key(&path) {
        let bytes = std::fs::read(&path).map_err(|e| {
            DecoderError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Loaded descriptor file");
        descriptors.insert(path.clone(), bytes);
    }

    Ok(Binding {
        package,
        path,
        stream,
        message: protobuf.msg_name.clone(),
    })
}

fn file_error(path: &Path, direction: &str, e: DecoderError) -> DecoderError {
    DecoderError::Config(format!(
        "failed to verify {} in file {}: {}",
        direction,
        path.display(),
        e
    ))
}

fn finish<T>(value: T, mut errors: Vec<DecoderError>) -> DecoderResult<T> {
    match errors.len() {
        0 => Ok(value),
        1 => Err(errors.remove(0)),
        _ => Err(DecoderError::Batch(errors)),
    }
}
