use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version of a .NET tool package, e.g. `1.2.7` or `1.3.0-preview.12`.
///
/// Build metadata after `+` is ignored. NuGet's optional fourth `revision`
/// component orders after `patch`. A release sorts after every prerelease of
/// the same numeric version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub revision: u64,
    pub pre: Option<String>,
}

impl ToolVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision: 0,
            pre: None,
        }
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

impl FromStr for ToolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let without_build = s.split('+').next().unwrap_or(s);
        let (core, pre) = match without_build.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(format!("empty prerelease tag in '{}'", s)),
            None => (without_build, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(format!("'{}' is not a version", s));
        }

        let mut numbers = [0u64; 4];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("'{}' is not a version", s))?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            revision: numbers[3],
            pre,
        })
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// One row of `dotnet tool list -g`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledTool {
    pub package_id: String,
    pub version: ToolVersion,
    pub commands: Vec<String>,
}

/// Captured result of a finished external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr, each trimmed, empty streams skipped.
    pub fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPortCreation {
    pub created: bool,
    pub execution_log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub pid: Option<u32>,
    pub serial_port: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ToolVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_versions() {
        assert_eq!(v("1.12.3"), ToolVersion::new(1, 12, 3));
        assert_eq!(v("2.0"), ToolVersion::new(2, 0, 0));
        assert_eq!(v("1.0.0.4").revision, 4);
        assert_eq!(v("1.0.0.4").to_string(), "1.0.0.4");
        assert_eq!(v("1.0.0.0"), ToolVersion::new(1, 0, 0));
        assert_eq!(v("1.2.3+sha.abc").to_string(), "1.2.3");
        assert_eq!(v("1.3.0-preview.12").pre.as_deref(), Some("preview.12"));
        assert!("".parse::<ToolVersion>().is_err());
        assert!("abc".parse::<ToolVersion>().is_err());
        assert!("1.2.3-".parse::<ToolVersion>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(v("1.2.10") > v("1.2.9"));
        assert!(v("1.3.0") > v("1.3.0-preview.12"));
        assert!(v("1.3.0-preview.12") > v("1.3.0-preview.9"));
        assert!(v("1.3.0-preview.1") > v("1.2.99"));
        assert!(v("1.3.0-beta") > v("1.3.0-alpha"));
        assert!(v("1.2.7.1") > v("1.2.7"));
        assert!(v("1.2.8") > v("1.2.7.9"));
        assert_eq!(v("1.2.3").cmp(&v("1.2.3")), Ordering::Equal);
    }

    #[test]
    fn test_command_output_combined() {
        let output = CommandOutput {
            status: Some(0),
            stdout: "  created COM30\n".to_string(),
            stderr: String::new(),
        };
        assert!(output.success());
        assert_eq!(output.combined(), "created COM30");

        let failed = CommandOutput {
            status: Some(1),
            stdout: "partial".to_string(),
            stderr: "access denied\n".to_string(),
        };
        assert!(!failed.success());
        assert_eq!(failed.combined(), "partial\naccess denied");
    }
}
