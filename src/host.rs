use std::path::PathBuf;

/// Facts about the machine the orchestrator is running on. Detected once per
/// run and threaded through planning (OS filter) and the hook environment.
#[derive(Debug, Clone)]
pub struct HostInfo {
    /// Distribution-level identifier: `ubuntu`, `arch`, `macos`, or the
    /// family name when nothing more specific is known.
    pub os: String,
    /// `linux` or `darwin`.
    pub family: String,
    pub arch: String,
    /// First known package manager found on PATH, if any.
    pub pkg_mgr: Option<String>,
    pub has_sudo: bool,
    pub home: PathBuf,
}

const PKG_MANAGERS: &[&str] = &["brew", "apt", "pacman", "dnf", "zypper"];

impl HostInfo {
    pub fn detect() -> Self {
        let family = if cfg!(target_os = "macos") {
            "darwin".to_string()
        } else {
            "linux".to_string()
        };

        let os = if family == "darwin" {
            "macos".to_string()
        } else {
            linux_distro_id().unwrap_or_else(|| "linux".to_string())
        };

        let pkg_mgr = PKG_MANAGERS
            .iter()
            .find(|m| which::which(m).is_ok())
            .map(|m| m.to_string());

        Self {
            os,
            family,
            arch: std::env::consts::ARCH.to_string(),
            pkg_mgr,
            has_sudo: which::which("sudo").is_ok(),
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
        }
    }

    /// Whether a module's `os` set admits this host. An empty set means all
    /// hosts. `macos` and `darwin` are accepted as spellings of each other.
    pub fn matches(&self, os_set: &[String]) -> bool {
        if os_set.is_empty() {
            return true;
        }
        os_set.iter().any(|o| {
            o == &self.os
                || o == &self.family
                || (self.family == "darwin" && (o == "macos" || o == "darwin"))
        })
    }
}

/// `ID=` field from /etc/os-release (`ubuntu`, `arch`, `debian`, ...).
fn linux_distro_id() -> Option<String> {
    let content = std::fs::read_to_string("/etc/os-release").ok()?;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("ID=") {
            let id = value.trim().trim_matches('"').to_string();
            if !id.is_empty() {
                return Some(id);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(os: &str, family: &str) -> HostInfo {
        HostInfo {
            os: os.to_string(),
            family: family.to_string(),
            arch: "x86_64".to_string(),
            pkg_mgr: None,
            has_sudo: false,
            home: PathBuf::from("/home/test"),
        }
    }

    #[test]
    fn test_empty_os_set_matches_everything() {
        assert!(host("ubuntu", "linux").matches(&[]));
        assert!(host("macos", "darwin").matches(&[]));
    }

    #[test]
    fn test_family_match() {
        let h = host("ubuntu", "linux");
        assert!(h.matches(&["linux".to_string()]));
        assert!(h.matches(&["ubuntu".to_string()]));
        assert!(!h.matches(&["arch".to_string()]));
        assert!(!h.matches(&["darwin".to_string()]));
    }

    #[test]
    fn test_darwin_spellings() {
        let h = host("macos", "darwin");
        assert!(h.matches(&["darwin".to_string()]));
        assert!(h.matches(&["macos".to_string()]));
        assert!(!h.matches(&["linux".to_string()]));
    }
}
