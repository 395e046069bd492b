use std::fmt;

/// A file's type and permission bits, normalized away from whatever host
/// system wrote the archive.
///
/// The layout follows Go's `os.FileMode`: type flags in the high bits,
/// `rwxrwxrwx` in the low nine. Not every flag is meaningful on every
/// system, but the bit positions never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode(pub u32);

impl Mode {
    /// `d`: directory
    pub const DIR: Self = Self(1 << 31);
    /// `a`: append-only
    pub const APPEND: Self = Self(1 << 30);
    /// `l`: exclusive use
    pub const EXCLUSIVE: Self = Self(1 << 29);
    /// `T`: temporary file (Plan 9)
    pub const TEMPORARY: Self = Self(1 << 28);
    /// `L`: symbolic link
    pub const SYMLINK: Self = Self(1 << 27);
    /// `D`: device file
    pub const DEVICE: Self = Self(1 << 26);
    /// `p`: named pipe
    pub const NAMED_PIPE: Self = Self(1 << 25);
    /// `S`: unix domain socket
    pub const SOCKET: Self = Self(1 << 24);
    /// `u`: setuid
    pub const SETUID: Self = Self(1 << 23);
    /// `g`: setgid
    pub const SETGID: Self = Self(1 << 22);
    /// `c`: character device, qualifies [Self::DEVICE]
    pub const CHAR_DEVICE: Self = Self(1 << 21);
    /// `t`: sticky
    pub const STICKY: Self = Self(1 << 20);
    /// `?`: non-regular file of unknown kind
    pub const IRREGULAR: Self = Self(1 << 19);
}

impl fmt::Display for Mode {
    /// `ls -l` style: type letters (or a single `-`), then the permission
    /// triplets.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const TYPE_LETTERS: &[(Mode, char)] = &[
            (Mode::DIR, 'd'),
            (Mode::APPEND, 'a'),
            (Mode::EXCLUSIVE, 'l'),
            (Mode::TEMPORARY, 'T'),
            (Mode::SYMLINK, 'L'),
            (Mode::DEVICE, 'D'),
            (Mode::NAMED_PIPE, 'p'),
            (Mode::SOCKET, 'S'),
            (Mode::SETUID, 'u'),
            (Mode::SETGID, 'g'),
            (Mode::CHAR_DEVICE, 'c'),
            (Mode::STICKY, 't'),
            (Mode::IRREGULAR, '?'),
        ];

        let mut wrote_type = false;
        for &(flag, letter) in TYPE_LETTERS {
            if self.has(flag) {
                write!(f, "{letter}")?;
                wrote_type = true;
            }
        }
        if !wrote_type {
            write!(f, "-")?;
        }

        for (i, letter) in "rwxrwxrwx".char_indices() {
            if self.has(Mode(1 << (8 - i))) {
                write!(f, "{letter}")?;
            } else {
                write!(f, "-")?;
            }
        }

        Ok(())
    }
}

impl From<UnixMode> for Mode {
    fn from(m: UnixMode) -> Self {
        let mut mode = Mode(m.0 & 0o777);

        mode |= match m & UnixMode::IFMT {
            UnixMode::IFDIR => Mode::DIR,
            UnixMode::IFLNK => Mode::SYMLINK,
            UnixMode::IFBLK => Mode::DEVICE,
            UnixMode::IFCHR => Mode::DEVICE | Mode::CHAR_DEVICE,
            UnixMode::IFIFO => Mode::NAMED_PIPE,
            UnixMode::IFSOCK => Mode::SOCKET,
            // IFREG, or type bits something unix never wrote
            _ => Mode(0),
        };

        if m.has(UnixMode::ISUID) {
            mode |= Mode::SETUID
        }
        if m.has(UnixMode::ISGID) {
            mode |= Mode::SETGID
        }
        if m.has(UnixMode::ISVTX) {
            mode |= Mode::STICKY
        }

        mode
    }
}

impl From<MsdosMode> for Mode {
    fn from(m: MsdosMode) -> Self {
        // FAT only knows "directory" and "read-only"; invent the rest
        let mut mode = if m.has(MsdosMode::DIR) {
            Mode::DIR | Mode(0o777)
        } else {
            Mode(0o666)
        };
        if m.has(MsdosMode::READ_ONLY) {
            mode &= Mode(!0o222);
        }

        mode
    }
}

impl From<u32> for Mode {
    fn from(u: u32) -> Self {
        Mode(u)
    }
}

/// Unix `st_mode` bits, as stored in the upper half of a central directory
/// header's external attributes when the creator host is unix-ish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnixMode(pub u32);

impl UnixMode {
    /// mask for the file-type nibble
    pub const IFMT: Self = Self(0xf000);
    /// socket
    pub const IFSOCK: Self = Self(0xc000);
    /// symbolic link
    pub const IFLNK: Self = Self(0xa000);
    /// regular file
    pub const IFREG: Self = Self(0x8000);
    /// block device
    pub const IFBLK: Self = Self(0x6000);
    /// directory
    pub const IFDIR: Self = Self(0x4000);
    /// character device
    pub const IFCHR: Self = Self(0x2000);
    /// fifo
    pub const IFIFO: Self = Self(0x1000);
    /// setuid
    pub const ISUID: Self = Self(0x800);
    /// setgid
    pub const ISGID: Self = Self(0x400);
    /// sticky
    pub const ISVTX: Self = Self(0x200);
}

impl From<u32> for UnixMode {
    fn from(u: u32) -> Self {
        UnixMode(u)
    }
}

/// FAT attribute bits, as stored in a central directory header's external
/// attributes when the creator host is DOS-ish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsdosMode(pub u32);

impl MsdosMode {
    /// the entry is a directory
    pub const DIR: Self = Self(0x10);
    /// the entry is read-only
    pub const READ_ONLY: Self = Self(0x01);
}

impl From<u32> for MsdosMode {
    fn from(u: u32) -> Self {
        MsdosMode(u)
    }
}

macro_rules! bit_ops_for {
    ($T: ty) => {
        impl std::ops::BitAnd for $T {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl std::ops::BitAndAssign for $T {
            fn bitand_assign(&mut self, rhs: Self) {
                self.0 &= rhs.0;
            }
        }

        impl std::ops::BitOr for $T {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $T {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl $T {
            /// True when `self` and `rhs` share at least one set bit.
            pub fn has(&self, rhs: Self) -> bool {
                self.0 & rhs.0 != 0
            }
        }
    };
}

bit_ops_for!(Mode);
bit_ops_for!(UnixMode);
bit_ops_for!(MsdosMode);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_modes_map_over() {
        let mode = Mode::from(UnixMode(0o100644));
        assert_eq!(mode.0 & 0o777, 0o644);
        assert!(!mode.has(Mode::DIR));

        let mode = Mode::from(UnixMode(0o40755));
        assert!(mode.has(Mode::DIR));

        let mode = Mode::from(UnixMode(0o120777));
        assert!(mode.has(Mode::SYMLINK));

        let mode = Mode::from(UnixMode(0o020644));
        assert!(mode.has(Mode::DEVICE));
        assert!(mode.has(Mode::CHAR_DEVICE));
    }

    #[test]
    fn msdos_read_only_strips_write_bits() {
        let mode = Mode::from(MsdosMode(0x01));
        assert_eq!(mode.0 & 0o777, 0o444);

        let mode = Mode::from(MsdosMode(0x10));
        assert!(mode.has(Mode::DIR));
        assert_eq!(mode.0 & 0o777, 0o777);
    }

    #[test]
    fn display_reads_like_ls() {
        assert_eq!(Mode::from(UnixMode(0o100644)).to_string(), "-rw-r--r--");
        assert_eq!(Mode::from(UnixMode(0o40755)).to_string(), "drwxr-xr-x");
        assert_eq!(
            Mode::from(UnixMode(0o120777)).to_string(),
            "Lrwxrwxrwx"
        );
    }
}
