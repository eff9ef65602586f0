//! # FLEX file system module
//!
//! FLEX chains sectors into files: every sector begins with a 4-byte
//! header (forward link track/sector plus a sequence number) followed by
//! 252 data bytes.  The System Information Record in track 0 sector 3
//! names the volume and anchors the free chain; the directory starts at
//! track 0 sector 5 and is itself a sector chain with 24-byte entries.
//!
//! Read-oriented, like the RSDOS backend.

use bit_vec::BitVec;
use log::{debug,error};
use crate::img;
use crate::fs;
use crate::fs::{FileName,FileKind,FileInfo};
use crate::{STDRESULT,DYNERR};

pub const SIR_SECTOR: usize = 3;
pub const FIRST_DIR_SECTOR: usize = 5;
const ENTRY_SIZE: usize = 24;
const FIRST_ENTRY_OFFSET: usize = 16;
pub const DATA_BYTES: usize = 252;

const FILE_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9-]{0,7}(\.[A-Za-z][A-Za-z0-9-]{0,2})?$";

/// System Information Record fields this backend uses
pub struct Sir {
    pub volume_name: String,
    pub volume_number: u16,
    pub free_count: usize,
    pub max_track: usize,
    pub max_sector: usize
}

impl Sir {
    fn from_bytes(dat: &[u8]) -> Self {
        let volume_name = String::from_utf8_lossy(&dat[16..27]).trim_end_matches(char::from(0)).trim_end().to_string();
        Self {
            volume_name,
            volume_number: u16::from_be_bytes([dat[27],dat[28]]),
            free_count: u16::from_be_bytes([dat[33],dat[34]]) as usize,
            max_track: dat[38] as usize,
            max_sector: dat[39] as usize
        }
    }
}

struct Entry {
    name: FileName,
    start: (usize,usize),
    sector_count: usize,
    random: bool
}

impl Entry {
    fn from_bytes(dat: &[u8]) -> Self {
        let base = String::from_utf8_lossy(&dat[0..8]).trim_end_matches(char::from(0)).trim_end().to_string();
        let extension = String::from_utf8_lossy(&dat[8..11]).trim_end_matches(char::from(0)).trim_end().to_string();
        Self {
            name: FileName { base, extension },
            start: (dat[13] as usize,dat[14] as usize),
            sector_count: u16::from_be_bytes([dat[17],dat[18]]) as usize,
            random: dat[19] != 0
        }
    }
}

/// The primary interface for disk operations
pub struct Disk {
    img: Box<dyn img::DiskImage>
}

impl Disk {
    pub fn from_img(mut img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        if img.sector_size() != 256 {
            debug!("FLEX needs 256 byte sectors");
            return Err(Box::new(fs::Error::UnsupportedGeometry));
        }
        let sir = Sir::from_bytes(&img.read_sector(0,0,SIR_SECTOR)?);
        if sir.max_track + 1 > img.tracks() || sir.max_sector > img.sectors()*img.heads() {
            debug!("SIR geometry {}/{} exceeds the disk",sir.max_track,sir.max_sector);
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        Ok(Self { img })
    }
    /// Test an image for a plausible System Information Record
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if img.sector_size() != 256 || img.tracks() < 2 {
            return false;
        }
        match img.read_sector(0,0,SIR_SECTOR) {
            Ok(dat) => {
                let sir = Sir::from_bytes(&dat);
                sir.max_track > 0
                    && sir.max_track + 1 <= img.tracks()
                    && sir.max_sector > 0
                    && sir.max_sector <= img.sectors()*img.heads()
            },
            Err(_) => false
        }
    }
    fn sir(&mut self) -> Result<Sir,DYNERR> {
        Ok(Sir::from_bytes(&self.img.read_sector(0,0,SIR_SECTOR)?))
    }
    /// FLEX numbers sectors continuously across both heads
    fn read_ts(&mut self,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        let per_head = self.img.sectors();
        let head = (sector-1) / per_head;
        self.img.read_sector(head,track,(sector-1) % per_head + 1)
    }
    /// visit the directory chain, collecting live entries
    fn entries(&mut self) -> Result<Vec<Entry>,DYNERR> {
        let mut ans: Vec<Entry> = Vec::new();
        let mut ts = (0,FIRST_DIR_SECTOR);
        let mut guard = 0;
        loop {
            let buf = self.read_ts(ts.0,ts.1)?;
            let mut offset = FIRST_ENTRY_OFFSET;
            while offset + ENTRY_SIZE <= buf.len() {
                let dat = &buf[offset..offset+ENTRY_SIZE];
                match dat[0] {
                    0x00 | 0xff => {},
                    _ => ans.push(Entry::from_bytes(dat))
                }
                offset += ENTRY_SIZE;
            }
            ts = (buf[0] as usize,buf[1] as usize);
            if ts == (0,0) {
                return Ok(ans);
            }
            guard += 1;
            if guard > 1000 {
                error!("directory chain does not terminate");
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
        }
    }
    fn find_entry(&mut self,name: &str) -> Result<Option<Entry>,DYNERR> {
        let want = FileName::from_path(name);
        for entry in self.entries()? {
            if entry.name.matches(&want) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
    /// follow a sector chain; every visited (track,sector) is returned
    fn sector_chain(&mut self,start: (usize,usize)) -> Result<Vec<(usize,usize)>,DYNERR> {
        let total = self.img.heads()*self.img.tracks()*self.img.sectors();
        let mut seen = BitVec::from_elem(total,false);
        let mut ans: Vec<(usize,usize)> = Vec::new();
        let mut ts = start;
        while ts != (0,0) {
            let idx = ts.0*self.img.sectors()*self.img.heads() + ts.1 - 1;
            if ts.1 < 1 || idx >= total || seen.get(idx)==Some(true) {
                error!("sector chain is damaged at {}/{}",ts.0,ts.1);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
            seen.set(idx,true);
            ans.push(ts);
            let buf = self.read_ts(ts.0,ts.1)?;
            ts = (buf[0] as usize,buf[1] as usize);
        }
        Ok(ans)
    }
}

impl fs::DiskFS for Disk {
    fn list_files(&mut self) -> Result<Vec<String>,DYNERR> {
        Ok(self.entries()?.iter().map(|e| e.name.to_string()).collect())
    }
    fn file_exists(&mut self,name: &str) -> Result<bool,DYNERR> {
        Ok(self.find_entry(name)?.is_some())
    }
    fn read_file(&mut self,name: &str) -> Result<fs::File,DYNERR> {
        match self.find_entry(name)? {
            Some(entry) => {
                let chain = self.sector_chain(entry.start)?;
                let mut data: Vec<u8> = Vec::new();
                for ts in &chain {
                    let buf = self.read_ts(ts.0,ts.1)?;
                    data.extend_from_slice(&buf[4..4+DATA_BYTES]);
                }
                let kind = match entry.name.extension.to_ascii_uppercase().as_str() {
                    "TXT" | "BAS" => FileKind::Text,
                    "CMD" | "BIN" | "SYS" => FileKind::MachineCode,
                    _ => FileKind::Data
                };
                Ok(fs::File {
                    name: entry.name.to_string(),
                    kind,
                    data,
                    load_address: None,
                    start_address: None
                })
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn write_file(&mut self,_name: &str,_file: &fs::File) -> STDRESULT {
        error!("writing FLEX disks is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn delete_file(&mut self,_name: &str) -> STDRESULT {
        error!("writing FLEX disks is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn rename_file(&mut self,_old_name: &str,_new_name: &str) -> STDRESULT {
        error!("writing FLEX disks is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn is_valid_filename(&self,name: &str) -> bool {
        let re = regex::Regex::new(FILE_NAME_PATTERN).expect("pattern should compile");
        re.is_match(name)
    }
    fn free(&mut self) -> Result<usize,DYNERR> {
        Ok(self.sir()?.free_count * DATA_BYTES)
    }
    fn check(&mut self) -> STDRESULT {
        let total = self.img.heads()*self.img.tracks()*self.img.sectors();
        let mut used = BitVec::from_elem(total,false);
        for entry in self.entries()? {
            if entry.random {
                // random files start with an index map, skip the data walk
                continue;
            }
            let chain = self.sector_chain(entry.start)?;
            if entry.sector_count != 0 && chain.len() != entry.sector_count {
                error!("entry says {} sectors, chain has {}",entry.sector_count,chain.len());
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
            for ts in chain {
                let idx = ts.0*self.img.sectors()*self.img.heads() + ts.1 - 1;
                if used.get(idx)==Some(true) {
                    error!("sector {}/{} belongs to two files",ts.0,ts.1);
                    return Err(Box::new(fs::Error::FileSystemConsistency));
                }
                used.set(idx,true);
            }
        }
        Ok(())
    }
    fn get_file_info(&mut self,name: &str) -> Result<FileInfo,DYNERR> {
        match self.find_entry(name)? {
            Some(entry) => {
                let chain = self.sector_chain(entry.start)?;
                Ok(FileInfo {
                    name: entry.name.to_string(),
                    kind: FileKind::Data,
                    size: chain.len()*DATA_BYTES,
                    sectors: chain.len(),
                    protected: false
                })
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn is_sector_allocated(&mut self,head: usize,track: usize,sector: usize) -> Result<bool,DYNERR> {
        if head >= self.img.heads() || track >= self.img.tracks() || sector < 1 || sector > self.img.sectors() {
            return Err(Box::new(img::Error::SectorNotFound));
        }
        // system track is always in use; otherwise a sector is free
        // exactly when it appears on the free chain, which would mean
        // walking it here; report by exclusion from the free chain count
        if track==0 {
            return Ok(true);
        }
        let mut used = BitVec::from_elem(self.img.heads()*self.img.tracks()*self.img.sectors(),false);
        for entry in self.entries()? {
            for ts in self.sector_chain(entry.start)? {
                let idx = ts.0*self.img.sectors()*self.img.heads() + ts.1 - 1;
                used.set(idx,true);
            }
        }
        let flat = sector + head*self.img.sectors();
        let idx = track*self.img.sectors()*self.img.heads() + flat - 1;
        Ok(used.get(idx)==Some(true))
    }
    fn what_am_i(&self) -> fs::FileSystemType {
        fs::FileSystemType::Flex
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
