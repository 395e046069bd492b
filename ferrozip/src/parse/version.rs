use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use winnow::{binary::le_u8, seq, PResult, Parser, Partial};

/// A zip version word: either "made by" or "needed to extract".
///
/// The low byte is the version times ten (45 means 4.5); the high byte
/// names the host system, which readers use to interpret external
/// attributes. See APPNOTE section 4.4.2.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    /// The host system half of the word
    pub host_system: HostSystem,

    /// Feature version times ten, e.g. 20 for 2.0
    pub version: u8,
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} v{}.{}",
            self.host_system,
            self.version / 10,
            self.version % 10
        )
    }
}

impl Version {
    /// Version 2.0, the baseline needed to extract deflated entries.
    pub const NEEDED_BASELINE: u8 = 20;

    /// Version 4.5, needed when an entry carries zip64 fields.
    pub const NEEDED_ZIP64: u8 = 45;

    /// Parse a version from a byte slice. Little-endian: the version byte
    /// is the low half of the word, so it comes first.
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        seq! {Self {
            version: le_u8,
            host_system: le_u8.map(HostSystem::from),
        }}
        .parse_next(i)
    }

    /// The two-byte form as written into headers.
    pub fn encode(self) -> [u8; 2] {
        [self.version, self.host_system.into()]
    }
}

/// The system an archive (or its version-needed requirement) came from,
/// from the high byte of a version word. APPNOTE section 4.4.2.2 assigns
/// the numbers; most of them are museum pieces by now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HostSystem {
    /// MS-DOS and OS/2, FAT-family file systems
    MsDos = 0,

    /// Amiga
    Amiga = 1,

    /// OpenVMS
    OpenVms = 2,

    /// UNIX: external attributes carry a unix mode in their upper half
    Unix = 3,

    /// VM/CMS
    VmCms = 4,

    /// Atari ST
    AtariSt = 5,

    /// OS/2 HPFS
    Os2Hpfs = 6,

    /// classic Macintosh
    Macintosh = 7,

    /// Z-System
    ZSystem = 8,

    /// CP/M
    CpM = 9,

    /// Windows NTFS
    WindowsNtfs = 10,

    /// MVS (OS/390, z/OS)
    Mvs = 11,

    /// VSE
    Vse = 12,

    /// Acorn RISC OS
    AcornRisc = 13,

    /// VFAT
    Vfat = 14,

    /// alternate MVS
    AlternateMvs = 15,

    /// BeOS
    BeOs = 16,

    /// Tandem
    Tandem = 17,

    /// OS/400
    Os400 = 18,

    /// macOS (Darwin)
    Osx = 19,

    /// Anything newer than APPNOTE 6.3.10 knows about (20 through 255
    /// are unassigned)
    #[num_enum(catch_all)]
    Unknown(u8),
}
