//! Definitions for Portable Executable (PE) COFF binaries (Windows binaries), and [`PeImage`],
//! an in-memory PE image whose section list can be edited and written back out.

#![allow(non_camel_case_types)]
#![forbid(unsafe_code)]
#![forbid(unused_must_use)]

mod image;
mod machine;
mod pe;
mod section;

pub use image::*;
pub use machine::*;
pub use pe::*;
pub use section::*;

/// Rounds `value` up to a multiple of `alignment`. An alignment of 0 or 1 leaves the value
/// unchanged. Returns `None` on overflow.
pub fn align_up(value: u32, alignment: u32) -> Option<u32> {
    if alignment <= 1 {
        return Some(value);
    }
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

#[test]
fn align_up_values() {
    assert_eq!(align_up(0, 0x200), Some(0));
    assert_eq!(align_up(1, 0x200), Some(0x200));
    assert_eq!(align_up(0x200, 0x200), Some(0x200));
    assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
    assert_eq!(align_up(17, 0), Some(17));
    assert_eq!(align_up(u32::MAX, 0x10), None);
}
