//! YAML 配置文件的读取、缺省补全与带注释写出。

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

/// 单个配置项的注释说明，用于生成带注释的 YAML。
#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;

    fn fields() -> &'static [FieldMeta];

    /// 加载后的业务校验。
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// 加载配置：
/// - `config_path` 给出时直接使用该路径；
/// - 否则使用 `base_dir/FILE_NAME`，两者都没有时使用当前目录。
///
/// 文件不存在时写出默认配置；文件缺字段时用默认值补齐并回写。
pub fn load_or_create<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = match (config_path, base_dir) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(base)) => base.join(T::FILE_NAME),
        (None, None) => PathBuf::from(T::FILE_NAME),
    };

    if !path.exists() {
        let config = T::default();
        write_with_comments(&config, &path)?;
        info!("已生成默认配置: {}", path.display());
        return Ok(config);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let user: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    let missing = missing_fields::<T>(&user);

    let mut merged = serde_yaml::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    merge_values(&mut merged, user);
    let config: T =
        serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))?;
    config.validate()?;

    if !missing.is_empty() {
        debug!("配置缺少字段 {:?}，按默认值补全", missing);
        write_with_comments(&config, &path)?;
    }
    Ok(config)
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let yaml = render_yaml(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// 按 `fields()` 的顺序输出，每项前面带 `# 说明`。
pub fn render_yaml<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let Value::Mapping(mapping) =
        serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))?
    else {
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
        let entry = serde_yaml::to_string(&Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        out.push_str(entry.trim_end());
        out.push('\n');
    }
    Ok(out)
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

/// 用户值覆盖默认值；映射逐键递归合并，其余类型整体替换。
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

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Demo {
        timeout: u64,
        name: String,
    }

    impl Default for Demo {
        fn default() -> Self {
            Self {
                timeout: 20,
                name: "demo".into(),
            }
        }
    }

    impl ConfigSpec for Demo {
        const FILE_NAME: &'static str = "demo.yml";

        fn fields() -> &'static [FieldMeta] {
            &[
                FieldMeta {
                    name: "timeout",
                    description: "超时（秒）",
                },
                FieldMeta {
                    name: "name",
                    description: "",
                },
            ]
        }
    }

    #[test]
    fn creates_default_file_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let cfg: Demo = load_or_create(None, Some(dir.path())).unwrap();
        assert_eq!(cfg, Demo::default());
        let text = fs::read_to_string(dir.path().join("demo.yml")).unwrap();
        assert!(text.contains("# 超时（秒）\ntimeout: 20"));
        assert!(text.contains("name: demo"));
    }

    #[test]
    fn partial_file_is_merged_and_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yml");
        fs::write(&path, "timeout: 5\n").unwrap();
        let cfg: Demo = load_or_create(Some(&path), None).unwrap();
        assert_eq!(cfg.timeout, 5);
        assert_eq!(cfg.name, "demo");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("name: demo"));
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        fs::write(&path, "timeout: [1,\n").unwrap();
        assert!(matches!(
            load_or_create::<Demo>(Some(&path), None),
            Err(ConfigError::Parse { .. })
        ));
    }
}
