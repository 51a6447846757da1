//! 配置文件读写：缺省值合并、缺字段回写、带注释生成。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    fn fields() -> &'static [FieldMeta];

    /// 反序列化后的取值校验，默认不做限制。
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// 读取配置；文件不存在时按默认值生成。
///
/// - `config_path` 给出时直接使用，忽略 `base_dir`
/// - 否则使用 `base_dir/FILE_NAME`，两者都没有则落在当前目录
pub fn load_or_create<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = match (config_path, base_dir) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(base)) => base.join(T::FILE_NAME),
        (None, None) => PathBuf::from(T::FILE_NAME),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if !path.exists() {
        let config = T::default();
        write_with_comments(&config, &path)?;
        info!(target: "config", path = %path.display(), "已生成默认配置");
        return Ok(config);
    }

    let user = read_yaml(&path)?;
    let missing = missing_fields::<T>(&user);

    let mut merged = to_value(&T::default())?;
    merge_values(&mut merged, user);
    let config: T =
        serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))?;
    config.validate()?;

    if !missing.is_empty() {
        debug!(target: "config", ?missing, "配置缺少字段，回写默认值");
        write_with_comments(&config, &path)?;
    }
    Ok(config)
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    let yaml = generate_yaml_with_comments(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// 按 [`ConfigSpec::fields`] 的顺序逐字段输出，每个字段上方带一行说明。
pub fn generate_yaml_with_comments<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let Value::Mapping(mapping) = to_value(config)? else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut out = String::new();
    for field in T::fields() {
        if !field.description.is_empty() {
            for line in field.description.lines() {
                out.push_str("# ");
                out.push_str(line);
                out.push('\n');
            }
        }
        let key = Value::String(field.name.to_string());
        let val = mapping.get(&key).cloned().unwrap_or(Value::Null);
        let single = serde_yaml::to_string(&Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        out.push_str(single.trim_end());
        out.push('\n');
    }
    Ok(out)
}

fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn to_value<T: Serialize>(config: &T) -> Result<Value, ConfigError> {
    serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))
}

fn missing_fields<T: ConfigSpec>(user: &Value) -> Vec<&'static str> {
    let Value::Mapping(map) = user else {
        return T::fields().iter().map(|f| f.name).collect();
    };
    T::fields()
        .iter()
        .filter(|f| !map.contains_key(Value::String(f.name.to_string())))
        .map(|f| f.name)
        .collect()
}

// 映射递归合并，其余类型（包括序列）整体覆盖
fn merge_values(default: &mut Value, user: Value) {
    match (default, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                match dest.get_mut(&key) {
                    Some(dest_val) => merge_values(dest_val, user_val),
                    None => {
                        dest.insert(key, user_val);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (dest, other) => *dest = other,
    }
}
