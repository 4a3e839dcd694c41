//! The Visual C++ tools that patching and library generation depend on.
//!
//! A [`Toolchain`] is located once per run and passed to the operations that need it.

#[cfg(test)]
mod tests;

use crate::error::PatchError;
use crate::version::Architecture;
use anyhow::Context;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use tracing::{debug, info, trace, warn};

static UNDNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"is :- "(.*)""#).unwrap());

/// Relative path, from the installation root, of the file that names the default tools version.
const TOOLS_VERSION_FILE: &str = "VC/Auxiliary/Build/Microsoft.VCToolsVersion.default.txt";

/// Turns decorated (mangled) symbol names into readable ones.
pub trait Demangler: Sync {
    /// Returns `None` if the name cannot be demangled.
    fn demangle(&self, name: &str, arch: Architecture) -> Option<String>;
}

/// Demangles MSVC names in process, without any external tools.
#[derive(Copy, Clone, Default, Debug)]
pub struct BuiltinDemangler;

impl Demangler for BuiltinDemangler {
    fn demangle(&self, name: &str, _arch: Architecture) -> Option<String> {
        msvc_demangler::demangle(name, msvc_demangler::DemangleFlags::llvm()).ok()
    }
}

/// Where to look for the tools.
#[derive(Clone, Default, Debug)]
pub struct ToolchainConfig {
    /// The Visual Studio installation directory. If not set, the Community edition of Visual
    /// Studio 2022 under `%ProgramFiles%` is used.
    pub root: Option<PathBuf>,
}

/// A located Visual C++ installation.
#[derive(Clone, Debug)]
pub struct Toolchain {
    root: PathBuf,
    version: String,
    host: Architecture,
}

impl Toolchain {
    /// Finds the installation and its default tools version.
    pub fn locate(config: &ToolchainConfig) -> Result<Self, PatchError> {
        let root = match &config.root {
            Some(root) => root.clone(),
            None => default_root(),
        };

        let version_file = root.join(TOOLS_VERSION_FILE);
        let Ok(version) = std::fs::read_to_string(&version_file) else {
            return Err(PatchError::ToolchainNotFound(version_file));
        };
        let version = version.trim().to_string();
        if version.is_empty() {
            return Err(PatchError::ToolchainNotFound(version_file));
        }

        debug!(root = %root.display(), version, "located Visual C++ tools");
        Ok(Self {
            root,
            version,
            host: Architecture::host(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The directory of the tools that target `arch`.
    pub fn tools_dir(&self, arch: Architecture) -> Result<PathBuf, PatchError> {
        let dir = self
            .root
            .join("VC/Tools/MSVC")
            .join(&self.version)
            .join("bin")
            .join(format!("Host{}", self.host.friendly_name()))
            .join(arch.friendly_name());
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(PatchError::ToolchainNotFound(dir))
        }
    }

    /// Runs `undname` on a single name.
    pub fn undname(&self, name: &str, arch: Architecture) -> anyhow::Result<Option<String>> {
        let exe = self.tools_dir(arch)?.join("undname.exe");
        let output = Command::new(&exe)
            .arg(name)
            .output()
            .with_context(|| format!("Failed to run {}", exe.display()))?;
        if !output.status.success() {
            trace!(name, status = ?output.status, "undname failed");
            return Ok(None);
        }
        Ok(parse_undname_output(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Runs the librarian to build an import library from a module-definition file.
    pub fn lib(&self, def: &Path, arch: Architecture, out: &Path) -> anyhow::Result<()> {
        let exe = self.tools_dir(arch)?.join("lib.exe");

        let mut def_arg = std::ffi::OsString::from("/def:");
        def_arg.push(def);
        let mut out_arg = std::ffi::OsString::from("/out:");
        out_arg.push(out);

        info!("Running {}", exe.display());
        let output = Command::new(&exe)
            .arg(def_arg)
            .arg(format!("/machine:{}", arch.friendly_name()))
            .arg(out_arg)
            .output()
            .with_context(|| format!("Failed to run {}", exe.display()))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!("lib: {line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("lib: {line}");
        }

        if !output.status.success() {
            return Err(PatchError::ToolFailed {
                tool: "lib.exe".to_string(),
                status: output.status.code(),
            }
            .into());
        }
        Ok(())
    }
}

impl Demangler for Toolchain {
    fn demangle(&self, name: &str, arch: Architecture) -> Option<String> {
        match self.undname(name, arch) {
            Ok(demangled) => demangled,
            Err(e) => {
                warn!("{e:#}");
                None
            }
        }
    }
}

fn default_root() -> PathBuf {
    let program_files =
        std::env::var_os("ProgramFiles").unwrap_or_else(|| "C:\\Program Files".into());
    PathBuf::from(program_files).join("Microsoft Visual Studio/2022/Community")
}

/// Extracts the demangled name from the output of `undname`.
pub fn parse_undname_output(output: &str) -> Option<String> {
    let caps = UNDNAME_REGEX.captures(output)?;
    Some(caps.get(1)?.as_str().to_string())
}
