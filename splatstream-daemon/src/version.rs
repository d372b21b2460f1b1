//! Version information and build metadata display

use std::fmt;

use splatstream_broadcaster::DEFAULT_BROADCAST_ADDR;

/// Version and build information for splatstream
pub struct VersionInfo {
    /// Package version from Cargo.toml
    pub daemon_version: &'static str,
    /// Target triple (e.g., x86_64-unknown-linux-gnu)
    pub target: &'static str,
    /// Build profile (debug or release)
    pub profile: &'static str,
    /// Git commit hash (if available)
    pub git_commit: Option<&'static str>,
    /// Build timestamp
    pub build_timestamp: &'static str,
}

impl VersionInfo {
    /// Get current version information
    pub fn current() -> Self {
        Self {
            daemon_version: env!("CARGO_PKG_VERSION"),
            target: env!("TARGET"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
            git_commit: option_env!("GIT_COMMIT_HASH"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
        }
    }

    /// Wire formats this build speaks
    pub fn protocols(&self) -> Vec<String> {
        vec![
            "Primary: TCP, u32 LE length prefix, JSON view request -> raw RGB + trailer".to_string(),
            format!("Broadcast: WebSocket ({}), JSON new_frame events, base64 JPEG/PNG", DEFAULT_BROADCAST_ADDR),
        ]
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "splatstream-daemon {}", self.daemon_version)?;
        writeln!(f)?;

        writeln!(f, "Build Information:")?;
        writeln!(f, "  Target:       {}", self.target)?;
        writeln!(f, "  Profile:      {}", self.profile)?;
        writeln!(f, "  Build Date:   {}", self.build_timestamp)?;

        if let Some(commit) = self.git_commit {
            writeln!(f, "  Git Commit:   {}", commit)?;
        }

        writeln!(f)?;
        writeln!(f, "Protocols:")?;
        for protocol in self.protocols() {
            writeln!(f, "  • {}", protocol)?;
        }

        Ok(())
    }
}

/// Short version string (for --version)
pub fn version_short() -> String {
    format!("splatstream-daemon {}", env!("CARGO_PKG_VERSION"))
}

/// Long version string (for --build-info)
pub fn version_long() -> String {
    VersionInfo::current().to_string()
}
