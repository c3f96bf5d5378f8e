//! User-Agent 池。
//!
//! 两种来源：
//! - 生成器（默认 [`TemplateUserAgentGenerator`]），按系统类型随机拼出 UA；
//! - 本地文件：`<ua_dir>/{windows,mac,linux,compatible,android,ios}.txt`，每行一个 UA。
//!
//! 首次 `get()` 时才会展开设备类型并读取文件。

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::IdentityPool;

/// 可请求的设备类别；`pc` / `mobile` 是组合类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Pc,
    Mobile,
    Win,
    Mac,
    Linux,
    Compatible,
    Android,
    Ios,
}

impl DeviceType {
    /// 该类别对应读取的 UA 文件。
    fn files(self) -> &'static [&'static str] {
        match self {
            Self::Pc => &["windows.txt", "mac.txt", "linux.txt"],
            Self::Mobile => &["android.txt", "ios.txt"],
            Self::Win => &["windows.txt"],
            Self::Mac => &["mac.txt"],
            Self::Linux => &["linux.txt"],
            Self::Compatible => &["compatible.txt"],
            Self::Android => &["android.txt"],
            Self::Ios => &["ios.txt"],
        }
    }

    /// 展开为生成器可用的系统类型；`compatible` 和 `ios` 不参与生成。
    fn os_types(self) -> &'static [OsType] {
        match self {
            Self::Pc => &[OsType::Win, OsType::Mac, OsType::Linux],
            Self::Mobile | Self::Android => &[OsType::Android],
            Self::Win => &[OsType::Win],
            Self::Mac => &[OsType::Mac],
            Self::Linux => &[OsType::Linux],
            Self::Compatible | Self::Ios => &[],
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pc" => Ok(Self::Pc),
            "mobile" => Ok(Self::Mobile),
            "win" | "windows" => Ok(Self::Win),
            "mac" => Ok(Self::Mac),
            "linux" => Ok(Self::Linux),
            "compatible" => Ok(Self::Compatible),
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsType {
    Win,
    Mac,
    Linux,
    Android,
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Win => "win",
            Self::Mac => "mac",
            Self::Linux => "linux",
            Self::Android => "android",
        };
        f.write_str(name)
    }
}

pub trait UserAgentGenerator: Send + Sync {
    /// 生成一个限定在 `os` 范围内的 UA；无法生成时返回 `None`。
    fn generate(&self, os: &[OsType]) -> Option<String>;
}

/// 内置生成器：Chrome / Firefox 模板 + 随机版本号。
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateUserAgentGenerator;

impl TemplateUserAgentGenerator {
    fn platform(os: OsType, rng: &mut impl Rng) -> String {
        match os {
            OsType::Win => {
                let nt = ["10.0", "6.3", "6.1"].choose(rng).copied().unwrap_or("10.0");
                format!("Windows NT {nt}; Win64; x64")
            }
            OsType::Mac => format!(
                "Macintosh; Intel Mac OS X 10_{}_{}",
                rng.gen_range(13..=15),
                rng.gen_range(0..=7)
            ),
            OsType::Linux => ["X11; Linux x86_64", "X11; Ubuntu; Linux x86_64"]
                .choose(rng)
                .copied()
                .unwrap_or("X11; Linux x86_64")
                .to_string(),
            OsType::Android => format!(
                "Linux; Android {}; {}",
                rng.gen_range(9..=14),
                ["Pixel 7", "SM-G991B", "M2101K9AG", "ONEPLUS A6013"]
                    .choose(rng)
                    .copied()
                    .unwrap_or("Pixel 7")
            ),
        }
    }
}

impl UserAgentGenerator for TemplateUserAgentGenerator {
    fn generate(&self, os: &[OsType]) -> Option<String> {
        let mut rng = rand::thread_rng();
        let os = *os.choose(&mut rng)?;
        let platform = Self::platform(os, &mut rng);
        let mobile = if os == OsType::Android { " Mobile" } else { "" };

        let ua = if rng.gen_bool(0.7) {
            let major = rng.gen_range(100..=126);
            format!(
                "Mozilla/5.0 ({platform}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{major}.0.{}.{}{mobile} Safari/537.36",
                rng.gen_range(4000..=6500),
                rng.gen_range(0..=200)
            )
        } else {
            let major = rng.gen_range(100..=128);
            let platform = if os == OsType::Android {
                format!("Android {}; Mobile", rng.gen_range(9..=14))
            } else {
                platform
            };
            format!("Mozilla/5.0 ({platform}; rv:{major}.0) Gecko/20100101 Firefox/{major}.0")
        };
        Some(ua)
    }
}

#[derive(Debug, Default)]
struct Loaded {
    os_types: Vec<OsType>,
    agents: Vec<String>,
}

pub struct UserAgentPool {
    types: Vec<DeviceType>,
    with_random_ua: bool,
    ua_dir: PathBuf,
    generator: Option<Arc<dyn UserAgentGenerator>>,
    state: Mutex<Option<Loaded>>,
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(Vec::new(), true, None)
    }
}

impl UserAgentPool {
    /// `types` 为空时默认 `[win, mac]`；`ua_dir` 为空时使用 `~/.graper/ua`。
    pub fn new(types: Vec<DeviceType>, with_random_ua: bool, ua_dir: Option<PathBuf>) -> Self {
        let types = if types.is_empty() {
            vec![DeviceType::Win, DeviceType::Mac]
        } else {
            types
        };
        Self {
            types,
            with_random_ua,
            ua_dir: ua_dir.unwrap_or_else(default_ua_dir),
            generator: Some(Arc::new(TemplateUserAgentGenerator)),
            state: Mutex::new(None),
        }
    }

    /// 替换（或用 `None` 移除）UA 生成器。
    pub fn with_generator(mut self, generator: Option<Arc<dyn UserAgentGenerator>>) -> Self {
        self.generator = generator;
        self
    }

    pub fn ua_dir(&self) -> &Path {
        &self.ua_dir
    }

    fn with_loaded<T>(&self, f: impl FnOnce(&mut Loaded) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let loaded = state.get_or_insert_with(|| self.load());
        f(loaded)
    }

    fn load(&self) -> Loaded {
        let mut loaded = Loaded::default();
        for typ in &self.types {
            for file in typ.files() {
                loaded
                    .agents
                    .extend(read_ua_file(&self.ua_dir.join(file)));
            }
            for os in typ.os_types() {
                if !loaded.os_types.contains(os) {
                    loaded.os_types.push(*os);
                }
            }
        }
        debug!(
            "UA 池初始化：{} 条本地 UA，系统类型 {:?}",
            loaded.agents.len(),
            loaded.os_types
        );
        loaded
    }
}

impl IdentityPool for UserAgentPool {
    type Item = String;

    /// 返回一个随机 UA；没有任何来源时返回空字符串。
    fn get(&self) -> Option<String> {
        let ua = self.with_loaded(|loaded| {
            if self.with_random_ua
                && let Some(generator) = &self.generator
                && !loaded.os_types.is_empty()
                && let Some(ua) = generator.generate(&loaded.os_types)
            {
                return ua;
            }
            loaded
                .agents
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_default()
        });
        Some(ua)
    }

    fn add(&self, item: String) {
        let item = item.trim().to_string();
        if item.is_empty() {
            return;
        }
        self.with_loaded(|loaded| loaded.agents.push(item));
    }

    fn len(&self) -> usize {
        self.with_loaded(|loaded| loaded.agents.len())
    }
}

/// 每行一个 UA，忽略空行；文件不存在时返回空列表。
pub fn read_ua_file(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn default_ua_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".graper").join("ua")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_types_parse() {
        assert_eq!("PC".parse::<DeviceType>(), Ok(DeviceType::Pc));
        assert_eq!("windows".parse::<DeviceType>(), Ok(DeviceType::Win));
        assert!("beos".parse::<DeviceType>().is_err());
    }

    #[test]
    fn composite_types_expand_and_exclude_ios() {
        let pool = UserAgentPool::new(
            vec![DeviceType::Pc, DeviceType::Mobile, DeviceType::Ios],
            true,
            Some(PathBuf::from("/nonexistent/ua")),
        );
        let os = pool.with_loaded(|l| l.os_types.clone());
        assert_eq!(
            os,
            vec![OsType::Win, OsType::Mac, OsType::Linux, OsType::Android]
        );
    }

    #[test]
    fn generator_respects_os_types() {
        let generator = TemplateUserAgentGenerator;
        for _ in 0..50 {
            let ua = generator.generate(&[OsType::Android]).unwrap();
            assert!(ua.contains("Android"), "{ua}");
        }
        assert!(generator.generate(&[]).is_none());
    }

    #[test]
    fn nothing_available_yields_empty_string() {
        let pool = UserAgentPool::new(
            vec![DeviceType::Ios],
            true,
            Some(PathBuf::from("/nonexistent/ua")),
        );
        assert_eq!(pool.get().as_deref(), Some(""));
        pool.add("Custom/1.0".into());
        assert_eq!(pool.get().as_deref(), Some("Custom/1.0"));
    }
}
