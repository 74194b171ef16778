// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Memory-mapped register window (Linux).
//!
//! Maps a unit's register BAR from a file (a UIO device node or a PCI
//! `resource` file) and exposes it through [`RegisterIo`]. The mapping is
//! released on drop.

use crate::error::UdmaError;
use crate::regs::RegisterIo;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// An mmap'ed register window over an open device file.
pub struct MappedBar {
    #[allow(dead_code)]
    file: File,
    base: *mut u8,
    size: usize,
}

// SAFETY: the mapping stays valid until Drop; accesses are volatile 32-bit
// reads/writes, which the device side defines as safe from any thread.
unsafe impl Send for MappedBar {}
unsafe impl Sync for MappedBar {}

impl MappedBar {
    /// Map `size` bytes of registers from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened (permissions, not
    /// found) or the mapping fails.
    pub fn open(path: &Path, size: usize) -> Result<Self, UdmaError> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    UdmaError::PermissionDenied(path.display().to_string())
                } else {
                    UdmaError::Io(e)
                }
            })?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(UdmaError::MmapFailed(format!(
                "mmap failed for {}",
                path.display()
            )));
        }

        log::debug!("mapped register window {} ({size} bytes)", path.display());
        Ok(Self {
            file,
            base: base as *mut u8,
            size,
        })
    }

    /// Size of the mapped window in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn cell(&self, off: usize) -> *mut u32 {
        assert!(off % 4 == 0 && off + 4 <= self.size, "register offset {off:#x} out of window");
        unsafe { self.base.add(off) as *mut u32 }
    }
}

impl RegisterIo for MappedBar {
    fn read32(&self, off: usize) -> u32 {
        unsafe { std::ptr::read_volatile(self.cell(off)) }
    }

    fn write32_relaxed(&self, off: usize, val: u32) {
        unsafe { std::ptr::write_volatile(self.cell(off), val) }
    }
}

impl Drop for MappedBar {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}
