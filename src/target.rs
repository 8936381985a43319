use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PipelineError;

/// One entry of the cross-compile matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildTarget {
    pub os: String,
    pub arch: String,
    pub arm: String,
    pub mips: String,
}

impl BuildTarget {
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            arm: String::new(),
            mips: String::new(),
        }
    }

    pub fn with_arm(mut self, arm: &str) -> Self {
        self.arm = arm.to_string();
        self
    }

    pub fn with_mips(mut self, mips: &str) -> Self {
        self.mips = mips.to_string();
        self
    }

    /// `os_arch`, followed by `_arm` or `_mips` when set.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}_{}", self.os, self.arch);
        if !self.arm.is_empty() {
            out.push('_');
            out.push_str(&self.arm);
        } else if !self.mips.is_empty() {
            out.push('_');
            out.push_str(&self.mips);
        }
        out
    }

    /// Suffix executables get on this target's OS.
    pub fn executable_suffix(&self) -> &'static str {
        if self.os == "windows" { ".exe" } else { "" }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for BuildTarget {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split('_').collect();
        let invalid = || PipelineError::config(format!("invalid build target '{value}'"));
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        match parts.as_slice() {
            [os, arch] => Ok(Self::new(os, arch)),
            [os, arch, variant] if *arch == "arm" => {
                if !matches!(*variant, "5" | "6" | "7") {
                    return Err(PipelineError::config(format!(
                        "invalid arm version '{variant}' in build target '{value}'"
                    )));
                }
                Ok(Self::new(os, arch).with_arm(variant))
            }
            [os, arch, variant] if arch.starts_with("mips") => {
                if !matches!(*variant, "hardfloat" | "softfloat") {
                    return Err(PipelineError::config(format!(
                        "invalid mips variant '{variant}' in build target '{value}'"
                    )));
                }
                Ok(Self::new(os, arch).with_mips(variant))
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for BuildTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for BuildTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
