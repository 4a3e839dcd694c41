//! Module versions with wildcards, and target architectures.


use crate::error::PatchError;
use dynlink_coff::IMAGE_FILE_MACHINE;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+|\*)(\.(\d+|\*)(\.(\d+|\*)(\.(\d+|\*))?)?)?$").unwrap()
});

/// One component of a [`Version`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Component {
    Number(u32),
    Wildcard,
}

impl Component {
    /// Wildcards compare equal to anything.
    fn compare(self, other: Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        }
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

/// A four-component version (`major.minor.patch.build`). Any component may be `*`. Components
/// that are left out when parsing are wildcards, so `1.2` means `1.2.*.*`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Version(pub [Component; 4]);

impl Version {
    pub const ANY: Version = Version([Component::Wildcard; 4]);

    /// Checks whether `s` is a syntactically valid version.
    pub fn is_valid(s: &str) -> bool {
        VERSION_REGEX.is_match(s)
    }

    /// Compares two versions component by component. A wildcard is equal to any component.
    ///
    /// This is not a total order (`1.*` equals both `1.0` and `1.5`, which differ), which is why
    /// `Version` does not implement `Ord`.
    pub fn compare(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.compare(*b) {
                Ordering::Equal => {}
                o => return o,
            }
        }
        Ordering::Equal
    }

    /// Checks whether the versions are equal, treating wildcards as matching anything.
    pub fn matches(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }

    pub fn is_full_wildcard(&self) -> bool {
        self.0.iter().all(|c| *c == Component::Wildcard)
    }
}

impl FromStr for Version {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PatchError::InvalidVersion(s.to_string());

        let caps = VERSION_REGEX.captures(s).ok_or_else(invalid)?;
        let mut components = [Component::Wildcard; 4];
        for (component, group) in components.iter_mut().zip([1, 3, 5, 7]) {
            *component = match caps.get(group).map(|m| m.as_str()) {
                None | Some("*") => Component::Wildcard,
                Some(digits) => Component::Number(digits.parse().map_err(|_| invalid())?),
            };
        }
        Ok(Self(components))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// The version a manifest symbol applies to.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VersionSpec {
    /// The symbol is never selected.
    Ignore,
    Version(Version),
}

impl VersionSpec {
    /// Checks whether the symbol applies to `target`.
    pub fn selects(&self, target: &Version) -> bool {
        match self {
            Self::Ignore => false,
            Self::Version(v) => v.matches(target),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ignore" {
            Ok(Self::Ignore)
        } else {
            Ok(Self::Version(s.parse()?))
        }
    }
}

impl Display for VersionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ignore => f.write_str("ignore"),
            Self::Version(v) => Display::fmt(v, f),
        }
    }
}

/// The architectures that images and toolchains are built for.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Architecture {
    X86,
    X64,
}

impl Architecture {
    /// The name used by Visual C++ tool directories and by `lib /machine:`.
    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X64 => "x64",
        }
    }

    /// The name used by the operating system.
    pub fn technical_name(self) -> &'static str {
        match self {
            Self::X86 => "i386",
            Self::X64 => "amd64",
        }
    }

    /// The architecture of the host, as far as the Visual C++ tool directories care.
    pub fn host() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::X64
        } else {
            Self::X86
        }
    }

    /// Derives the architecture from the optional header format: PE32 images are x86, PE32+
    /// images are x64.
    pub fn from_pe32_plus(pe32_plus: bool) -> Self {
        if pe32_plus { Self::X64 } else { Self::X86 }
    }

    pub fn machine(self) -> IMAGE_FILE_MACHINE {
        match self {
            Self::X86 => IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_I386,
            Self::X64 => IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_AMD64,
        }
    }
}

impl FromStr for Architecture {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86" | "i386" => Ok(Self::X86),
            "x64" | "amd64" | "x86_64" => Ok(Self::X64),
            _ => Err(PatchError::InvalidArchitecture(s.to_string())),
        }
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.friendly_name())
    }
}
