#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[allow(non_camel_case_types)]
pub struct IMAGE_FILE_MACHINE(pub u16);

impl IMAGE_FILE_MACHINE {
    pub const IMAGE_FILE_MACHINE_UNKNOWN: Self = Self(0);
    /// Intel 386.
    pub const IMAGE_FILE_MACHINE_I386: Self = Self(0x014c);
    /// ARM Thumb-2 Little-Endian
    pub const IMAGE_FILE_MACHINE_ARMNT: Self = Self(0x01c4);
    /// Intel 64
    pub const IMAGE_FILE_MACHINE_IA64: Self = Self(0x0200);
    /// AMD64 (K8)
    pub const IMAGE_FILE_MACHINE_AMD64: Self = Self(0x8664);
    /// ARM64 Little-Endian
    pub const IMAGE_FILE_MACHINE_ARM64: Self = Self(0xAA64);

    pub fn to_str_opt(self) -> Option<&'static str> {
        Some(match self.0 {
            0x0000 => "IMAGE_FILE_MACHINE_UNKNOWN",
            0x014c => "IMAGE_FILE_MACHINE_I386",
            0x01c4 => "IMAGE_FILE_MACHINE_ARMNT",
            0x0200 => "IMAGE_FILE_MACHINE_IA64",
            0x8664 => "IMAGE_FILE_MACHINE_AMD64",
            0xAA64 => "IMAGE_FILE_MACHINE_ARM64",
            _ => return None,
        })
    }

    pub fn to_str(self) -> &'static str {
        self.to_str_opt().unwrap_or("??")
    }
}

impl core::fmt::Debug for IMAGE_FILE_MACHINE {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        if let Some(s) = self.to_str_opt() {
            f.write_str(s)
        } else {
            write!(f, "??0x{:x}", self.0)
        }
    }
}
