//! DragonDos on-disk structures.
//!
//! A directory entry is 25 bytes.  Main entries carry the filename and
//! up to 4 extents; extension entries carry up to 7.  The final byte is
//! either the index of the next entry in the chain (when the
//! more-extensions flag is set) or the byte count of the file's last
//! sector (0 meaning a full sector).

use num_derive::FromPrimitive;
use crate::fs::{FileName,FileKind};

pub const DIRECTORY_TRACK: usize = 20;
pub const BACKUP_TRACK: usize = 16;
pub const SECTORS_PER_HEAD: usize = 18;
pub const SECTOR_SIZE: usize = 256;
pub const NUM_ENTRIES: usize = 160;
pub const ENTRY_SIZE: usize = 25;
pub const ENTRIES_PER_SECTOR: usize = 10;
/// extents held by a main entry
pub const MAIN_EXTENTS: usize = 4;
/// extents held by an extension entry
pub const EXTENSION_EXTENTS: usize = 7;
/// bitmap bytes per allocation sector, each byte covering 8 LSNs
pub const BITMAP_BYTES: usize = 180;

pub const FLAG_EXTENSION: u8 = 0x01;
pub const FLAG_PROTECTED: u8 = 0x02;
pub const FLAG_END_OF_DIRECTORY: u8 = 0x08;
pub const FLAG_MORE_EXTENSIONS: u8 = 0x20;
pub const FLAG_INVALID: u8 = 0x80;

/// file type byte carried in the 9-byte file header
#[derive(FromPrimitive,PartialEq,Clone,Copy)]
pub enum FileType {
    Basic = 1,
    MachineCode = 2
}

pub const FILE_HEADER_LEN: usize = 9;
pub const FILE_HEADER_LEAD: u8 = 0x55;
pub const FILE_HEADER_TRAIL: u8 = 0xaa;

/// A contiguous run of logical sectors allocated to a file.
/// On disk this is a big-endian LSN followed by a count byte;
/// a zero count marks an unused slot.
#[derive(PartialEq,Clone,Copy)]
pub struct Extent {
    pub lsn: usize,
    pub count: usize
}

/// Structured form of a 25 byte directory entry
pub struct DirectoryEntry {
    pub flags: u8,
    pub name: [u8;8],
    pub extension: [u8;3],
    pub extents: Vec<Extent>,
    /// next entry index or last sector size, depending on the flags
    pub tail: u8
}

impl DirectoryEntry {
    /// the form initialize puts in every slot
    pub fn empty() -> Self {
        Self {
            flags: FLAG_INVALID | FLAG_END_OF_DIRECTORY,
            name: [0;8],
            extension: [0;3],
            extents: Vec::new(),
            tail: 0
        }
    }
    pub fn is_valid(&self) -> bool {
        self.flags & FLAG_INVALID == 0
    }
    pub fn is_main(&self) -> bool {
        self.flags & FLAG_EXTENSION == 0
    }
    pub fn is_extension(&self) -> bool {
        self.flags & FLAG_EXTENSION != 0
    }
    pub fn is_protected(&self) -> bool {
        self.flags & FLAG_PROTECTED != 0
    }
    pub fn more_extensions(&self) -> bool {
        self.flags & FLAG_MORE_EXTENSIONS != 0
    }
    pub fn end_of_directory(&self) -> bool {
        self.flags & FLAG_END_OF_DIRECTORY != 0
    }
    pub fn from_bytes(dat: &[u8]) -> Self {
        let flags = dat[0];
        let mut name = [0u8;8];
        let mut extension = [0u8;3];
        let mut extents: Vec<Extent> = Vec::new();
        let (first,count) = match flags & FLAG_EXTENSION {
            0 => {
                name.copy_from_slice(&dat[1..9]);
                extension.copy_from_slice(&dat[9..12]);
                (12,MAIN_EXTENTS)
            },
            _ => (1,EXTENSION_EXTENTS)
        };
        for i in 0..count {
            let lsn = u16::from_be_bytes([dat[first+3*i],dat[first+3*i+1]]) as usize;
            let len = dat[first+3*i+2] as usize;
            if len > 0 {
                extents.push(Extent { lsn, count: len });
            }
        }
        Self {
            flags,
            name,
            extension,
            extents,
            tail: dat[24]
        }
    }
    pub fn to_bytes(&self) -> [u8;ENTRY_SIZE] {
        let mut ans = [0u8;ENTRY_SIZE];
        ans[0] = self.flags;
        let (first,count) = match self.is_main() {
            true => {
                ans[1..9].copy_from_slice(&self.name);
                ans[9..12].copy_from_slice(&self.extension);
                (12,MAIN_EXTENTS)
            },
            false => (1,EXTENSION_EXTENTS)
        };
        for i in 0..count {
            if i < self.extents.len() {
                let lsn = u16::to_be_bytes(self.extents[i].lsn as u16);
                ans[first+3*i] = lsn[0];
                ans[first+3*i+1] = lsn[1];
                ans[first+3*i+2] = self.extents[i].count as u8;
            }
        }
        ans[24] = self.tail;
        ans
    }
    pub fn file_name(&self) -> FileName {
        let base = String::from_utf8_lossy(&self.name).trim_end_matches(char::from(0)).trim_end().to_string();
        let extension = String::from_utf8_lossy(&self.extension).trim_end_matches(char::from(0)).trim_end().to_string();
        FileName { base, extension }
    }
    pub fn set_file_name(&mut self,fname: &FileName) {
        self.name = [0;8];
        self.extension = [0;3];
        for (i,byte) in fname.base.as_bytes().iter().take(8).enumerate() {
            self.name[i] = *byte;
        }
        for (i,byte) in fname.extension.as_bytes().iter().take(3).enumerate() {
            self.extension[i] = *byte;
        }
    }
}

/// Decode raw file content: a valid 9-byte header means BASIC or machine
/// code, anything else is a data file.
pub fn decode_file(name: &str,raw: Vec<u8>) -> crate::fs::File {
    if raw.len() >= FILE_HEADER_LEN && raw[0] == FILE_HEADER_LEAD && raw[8] == FILE_HEADER_TRAIL {
        let kind = match raw[1] {
            1 => Some(FileKind::Basic),
            2 => Some(FileKind::MachineCode),
            _ => None
        };
        if let Some(kind) = kind {
            let load_address = u16::from_be_bytes([raw[2],raw[3]]);
            let start_address = u16::from_be_bytes([raw[6],raw[7]]);
            return crate::fs::File {
                name: name.to_string(),
                kind,
                data: raw[FILE_HEADER_LEN..].to_vec(),
                load_address: Some(load_address),
                start_address: Some(start_address)
            };
        }
    }
    crate::fs::File::new_data(name,raw)
}

/// Flatten a file to raw content, prefixing the 9-byte header for the
/// kinds that carry one.
pub fn encode_file(file: &crate::fs::File) -> Vec<u8> {
    let typ = match file.kind {
        FileKind::Basic => FileType::Basic,
        FileKind::MachineCode => FileType::MachineCode,
        _ => return file.data.clone()
    };
    let mut ans = Vec::with_capacity(FILE_HEADER_LEN + file.data.len());
    ans.push(FILE_HEADER_LEAD);
    ans.push(typ as u8);
    ans.append(&mut u16::to_be_bytes(file.load_address.unwrap_or(0)).to_vec());
    ans.append(&mut u16::to_be_bytes(file.data.len() as u16).to_vec());
    ans.append(&mut u16::to_be_bytes(file.start_address.unwrap_or(0)).to_vec());
    ans.push(FILE_HEADER_TRAIL);
    ans.append(&mut file.data.clone());
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trip() {
        let mut entry = DirectoryEntry::empty();
        entry.flags = 0;
        entry.set_file_name(&FileName { base: "DRYBONES".to_string(), extension: "BIN".to_string() });
        entry.extents = vec![Extent { lsn: 0x123, count: 5 },Extent { lsn: 700, count: 2 }];
        entry.tail = 0x80;
        let flat = entry.to_bytes();
        assert_eq!(flat[0],0);
        assert_eq!(&flat[1..9],b"DRYBONES");
        assert_eq!(&flat[9..12],b"BIN");
        assert_eq!(&flat[12..15],&[0x01,0x23,5]);
        let back = DirectoryEntry::from_bytes(&flat);
        assert!(back.is_main());
        assert_eq!(back.file_name().to_string(),"DRYBONES.BIN");
        assert_eq!(back.extents.len(),2);
        assert_eq!(back.extents[1].lsn,700);
        assert_eq!(back.tail,0x80);
    }

    #[test]
    fn extension_entry_round_trip() {
        let mut entry = DirectoryEntry::empty();
        entry.flags = FLAG_EXTENSION | FLAG_MORE_EXTENSIONS;
        entry.extents = vec![Extent { lsn: 1, count: 1 };7];
        entry.tail = 9;
        let flat = entry.to_bytes();
        let back = DirectoryEntry::from_bytes(&flat);
        assert!(back.is_extension());
        assert!(back.more_extensions());
        assert_eq!(back.extents.len(),7);
        assert_eq!(back.tail,9);
    }

    #[test]
    fn machine_code_header() {
        let file = crate::fs::File::new_machine_code("TEST.BIN",vec![1,2,3],0x3000,0x3001);
        let raw = encode_file(&file);
        assert_eq!(&raw[0..9],&[0x55,2,0x30,0x00,0x00,0x03,0x30,0x01,0xaa]);
        let back = decode_file("TEST.BIN",raw);
        assert_eq!(back.kind,FileKind::MachineCode);
        assert_eq!(back.load_address,Some(0x3000));
        assert_eq!(back.start_address,Some(0x3001));
        assert_eq!(back.data,vec![1,2,3]);
    }

    #[test]
    fn headerless_is_data() {
        let back = decode_file("A.DAT",vec![0x55,9,0,0,0,0,0,0,0xaa,1]);
        // type 9 is not a known file type, so the header is invalid
        assert_eq!(back.kind,FileKind::Data);
        assert_eq!(back.data.len(),10);
    }
}
