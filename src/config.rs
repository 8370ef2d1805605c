//! Optional TOML configuration. Command line flags extend it.
//!
//! ```toml
//! system_include = "/usr/include/asm51"
//! include = ["lib", "vendor/inc"]
//! max_passes = 16
//! origin = "$0000"
//!
//! [define]
//! CLOCK = "0C"
//! ```

use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer};
use serde_derive::Deserialize;

pub const SYSTEM_INCLUDE: &str = "/usr/include/asm51";
pub const MAX_PASSES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Searched first for `#include`, before the working directory.
    #[serde(default = "system_include")]
    pub system_include: PathBuf,

    /// Searched after the working directory, in order.
    #[serde(default)]
    pub include: Vec<PathBuf>,

    /// Preprocessor iterations allowed before giving up.
    #[serde(default = "max_passes")]
    pub max_passes: usize,

    /// Initial location counter.
    #[serde(default, deserialize_with = "deserialize_bases_u16")]
    pub origin: u16,

    /// Macros in effect before the first source line.
    #[serde(default)]
    pub define: IndexMap<String, String>,
}

fn system_include() -> PathBuf {
    PathBuf::from(SYSTEM_INCLUDE)
}

fn max_passes() -> usize {
    MAX_PASSES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_include: system_include(),
            include: Vec::new(),
            max_passes: MAX_PASSES,
            origin: 0,
            define: IndexMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cant open config `{}`: {e}", path.display()))?;
        Self::parse(&text).map_err(|e| format!("{}: {e}", path.display()).into())
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// `$` for base 16, `%` for base 2, otherwise base 10.
fn deserialize_bases_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = String::deserialize(deserializer)?;
    if let Some(digits) = buf.strip_prefix('$') {
        u16::from_str_radix(digits, 16)
            .map_err(|e| de::Error::custom(format!("{buf} is not a valid base 16 address: {e}")))
    } else if let Some(digits) = buf.strip_prefix('%') {
        u16::from_str_radix(digits, 2)
            .map_err(|e| de::Error::custom(format!("{buf} is not a valid base 2 address: {e}")))
    } else {
        buf.parse::<u16>()
            .map_err(|e| de::Error::custom(format!("{buf} is not a valid base 10 address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn full_config() {
        let config = Config::parse(
            r#"
            system_include = "/opt/51/inc"
            include = ["lib"]
            max_passes = 4
            origin = "$0800"

            [define]
            CLOCK = "0C"
            DEBUG = "1"
            "#,
        )
        .unwrap();
        assert_eq!(config.system_include, PathBuf::from("/opt/51/inc"));
        assert_eq!(config.include, [PathBuf::from("lib")]);
        assert_eq!(config.max_passes, 4);
        assert_eq!(config.origin, 0x0800);
        let names: Vec<&str> = config.define.keys().map(String::as_str).collect();
        assert_eq!(names, ["CLOCK", "DEBUG"]);
    }

    #[test]
    fn origin_bases() {
        assert_eq!(Config::parse("origin = \"%1000\"").unwrap().origin, 8);
        assert_eq!(Config::parse("origin = \"256\"").unwrap().origin, 256);
        assert!(Config::parse("origin = \"$10000\"").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("orgin = \"$0000\"").is_err());
    }
}
