//! Optional YAML configuration.

use std::{fs::File, io::BufReader};

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use fn_error_context::context;
use serde::Deserialize;

/// The environment variable naming the config file.
pub const CONFIG_VAR: &str = "NYDUSIFY_BUILD_CONFIG";

/// Persistent settings for the builder.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Path to the nydus-image executable.
    #[serde(default)]
    pub nydus_image: Option<Utf8PathBuf>,
}

impl BuildConfig {
    /// Load the config named by [`CONFIG_VAR`], if set.
    #[context("Loading build config")]
    pub fn load() -> Result<Option<Self>> {
        let Some(config) = std::env::var_os(CONFIG_VAR) else {
            return Ok(None);
        };
        Self::load_from(File::open(&config).with_context(|| format!("Opening {config:?}"))?)
            .with_context(|| format!("Parsing config from {config:?}"))
            .map(Some)
    }

    fn load_from(f: File) -> Result<Self> {
        let r = serde_yaml::from_reader(BufReader::new(f))?;
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(s: &str) -> Result<BuildConfig> {
        let mut tmpf = tempfile::tempfile().unwrap();
        tmpf.write_all(s.as_bytes()).unwrap();
        std::io::Seek::rewind(&mut tmpf).unwrap();
        BuildConfig::load_from(tmpf)
    }

    #[test]
    fn test_parse_config() {
        let c = parse("nydus_image: /usr/local/bin/nydus-image\n").unwrap();
        assert_eq!(c.nydus_image.unwrap(), "/usr/local/bin/nydus-image");

        let c = parse("{}").unwrap();
        assert_eq!(c, BuildConfig::default());
    }

    #[test]
    fn test_parse_config_unknown_field() {
        assert!(parse("nydus_image: /x\nbogus: true\n").is_err());
    }
}
