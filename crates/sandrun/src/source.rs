use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Where a script's text comes from.
///
/// `RemoteBlob` and `DatabaseRef` are accepted references without a backend;
/// resolving them always fails with [`Error::NotImplementedSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    FilePath(PathBuf),
    Inline {
        code: String,
    },
    RemoteBlob {
        bucket: String,
        key: String,
        region: Option<String>,
    },
    DatabaseRef {
        id: String,
    },
}

impl ScriptSource {
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::FilePath(path.into())
    }

    #[must_use]
    pub fn inline(code: impl Into<String>) -> Self {
        Self::Inline { code: code.into() }
    }

    /// Short tag naming the variant, matching the JSON `type` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FilePath(_) => "file",
            Self::Inline { .. } => "inline",
            Self::RemoteBlob { .. } => "s3",
            Self::DatabaseRef { .. } => "database",
        }
    }

    /// Parse the JSON reference form: a bare string is a file path, an
    /// object is dispatched on its `type` field.
    ///
    /// # Errors
    /// [`Error::UnsupportedSourceKind`] for anything that is not a string or
    /// an object with a known `type`, [`Error::InvalidSource`] when a known
    /// type is missing its fields.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(path) if path.is_empty() => {
                Err(Error::InvalidSource("file path is empty".to_string()))
            }
            Value::String(path) => Ok(Self::file(path)),
            Value::Object(fields) => Self::from_tagged(fields),
            other => Err(Error::UnsupportedSourceKind(format!(
                "expected a path string or a tagged object, got {}",
                json_type_name(other)
            ))),
        }
    }

    fn from_tagged(fields: &Map<String, Value>) -> Result<Self> {
        let kind = match fields.get("type") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => {
                return Err(Error::UnsupportedSourceKind(format!(
                    "`type` must be a string, got {}",
                    json_type_name(other)
                )));
            }
            None => {
                return Err(Error::UnsupportedSourceKind(
                    "missing `type` field".to_string(),
                ));
            }
        };

        match kind {
            "file" => {
                let path = required_str(fields, kind, "path")?;
                if path.is_empty() {
                    return Err(Error::InvalidSource("file path is empty".to_string()));
                }
                Ok(Self::file(path))
            }
            "inline" => Ok(Self::inline(required_str(fields, kind, "code")?)),
            "s3" => Ok(Self::RemoteBlob {
                bucket: required_str(fields, kind, "bucket")?.to_string(),
                key: required_str(fields, kind, "key")?.to_string(),
                region: match fields.get("region") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(region)) => Some(region.clone()),
                    Some(_) => {
                        return Err(Error::InvalidSource(
                            "s3 source `region` must be a string".to_string(),
                        ));
                    }
                },
            }),
            "database" => Ok(Self::DatabaseRef {
                id: required_str(fields, kind, "scriptId")?.to_string(),
            }),
            other => Err(Error::UnsupportedSourceKind(format!(
                "unknown source type '{other}'"
            ))),
        }
    }

    /// Produce the full script text. Reads are buffered completely before
    /// returning; no variant yields partial content.
    ///
    /// # Errors
    /// See [`Error`]; remote variants always return
    /// [`Error::NotImplementedSource`].
    pub async fn resolve(&self) -> Result<String> {
        match self {
            Self::FilePath(path) => read_file(path).await,
            Self::Inline { code } => {
                if code.is_empty() {
                    Err(Error::InvalidSource("inline code is empty".to_string()))
                } else {
                    Ok(code.clone())
                }
            }
            Self::RemoteBlob {
                bucket,
                key,
                region,
            } => Err(Error::NotImplementedSource(format!(
                "remote blob source (bucket '{bucket}', key '{key}', region '{}')",
                region.as_deref().unwrap_or("default")
            ))),
            Self::DatabaseRef { id } => Err(Error::NotImplementedSource(format!(
                "database script source (scriptId '{id}')"
            ))),
        }
    }
}

impl TryFrom<Value> for ScriptSource {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(&value)
    }
}

async fn read_file(path: &Path) -> Result<String> {
    let read_failure = |message: String| Error::SourceReadFailure {
        path: path.display().to_string(),
        message,
    };

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| read_failure(e.to_string()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .await
        .map_err(|e| read_failure(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| read_failure(e.to_string()))
}

fn required_str<'a>(fields: &'a Map<String, Value>, kind: &str, name: &str) -> Result<&'a str> {
    match fields.get(name) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(Error::InvalidSource(format!(
            "{kind} source `{name}` must be a string"
        ))),
        None => Err(Error::InvalidSource(format!(
            "{kind} source requires `{name}`"
        ))),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
