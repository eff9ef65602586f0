//! # RSDOS file system module
//!
//! Disk BASIC on the Color Computer allocates granules of 9 sectors,
//! half a track each.  The granule allocation table lives in sector 2 of
//! track 17, the directory in sectors 3 through 11.  A GAT byte is 0xFF
//! when the granule is free, a link to the next granule, or 0xC0 plus
//! the sector count of the file's final granule.
//!
//! This backend is read-oriented: list, read, and check.  Writing RSDOS
//! disks is outside this library's charter.

use bit_vec::BitVec;
use log::{debug,error};
use crate::img;
use crate::fs;
use crate::fs::{FileName,FileKind,FileInfo};
use crate::{STDRESULT,DYNERR};

pub const DIR_TRACK: usize = 17;
pub const GAT_SECTOR: usize = 2;
pub const FIRST_DIR_SECTOR: usize = 3;
pub const LAST_DIR_SECTOR: usize = 11;
pub const SECTORS_PER_GRANULE: usize = 9;
pub const NUM_GRANULES: usize = 68;
const ENTRY_SIZE: usize = 32;
const ENTRIES_PER_SECTOR: usize = 8;
const GRANULE_FREE: u8 = 0xff;
const LAST_GRANULE_BASE: u8 = 0xc0;

const FILE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9 ]{0,7}(\.[A-Za-z0-9]{0,3})?$";

/// The primary interface for disk operations
pub struct Disk {
    img: Box<dyn img::DiskImage>
}

/// raw 32-byte directory entry fields we care about
struct Entry {
    name: FileName,
    file_type: u8,
    ascii: bool,
    first_granule: u8,
    last_sector_bytes: usize
}

impl Entry {
    fn from_bytes(dat: &[u8]) -> Self {
        let base = String::from_utf8_lossy(&dat[0..8]).trim_end().to_string();
        let extension = String::from_utf8_lossy(&dat[8..11]).trim_end().to_string();
        Self {
            name: FileName { base, extension },
            file_type: dat[11],
            ascii: dat[12]==0xff,
            first_granule: dat[13],
            last_sector_bytes: u16::from_be_bytes([dat[14],dat[15]]) as usize
        }
    }
    fn kind(&self) -> FileKind {
        match (self.file_type,self.ascii) {
            (0,_) => FileKind::Basic,
            (2,_) => FileKind::MachineCode,
            (3,_) => FileKind::Text,
            (_,true) => FileKind::Text,
            _ => FileKind::Data
        }
    }
}

impl Disk {
    pub fn from_img(img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        Self::check_geometry(&img)?;
        Ok(Self { img })
    }
    /// Test an image to see if it carries a plausible granule table
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if Self::check_geometry(img).is_err() {
            return false;
        }
        match img.read_sector(0,DIR_TRACK,GAT_SECTOR) {
            Ok(gat) => {
                for g in 0..NUM_GRANULES {
                    let v = gat[g];
                    let ok = v==GRANULE_FREE
                        || (v as usize) < NUM_GRANULES
                        || (v >= LAST_GRANULE_BASE && v <= LAST_GRANULE_BASE + SECTORS_PER_GRANULE as u8);
                    if !ok {
                        debug!("GAT byte {} at granule {} is not plausible",v,g);
                        return false;
                    }
                }
                true
            },
            Err(_) => false
        }
    }
    fn check_geometry(img: &Box<dyn img::DiskImage>) -> STDRESULT {
        let ok = img.heads()==1 && img.tracks()==35 && img.sectors()==18 && img.sector_size()==256;
        if !ok {
            debug!("RSDOS needs 35 tracks of 18 x 256 on one side");
            return Err(Box::new(fs::Error::UnsupportedGeometry));
        }
        Ok(())
    }
    /// granules skip the directory track
    fn granule_to_ts(granule: usize) -> (usize,usize) {
        let mut track = granule / 2;
        if track >= DIR_TRACK {
            track += 1;
        }
        (track,(granule % 2)*SECTORS_PER_GRANULE + 1)
    }
    fn gat(&mut self) -> Result<Vec<u8>,DYNERR> {
        self.img.read_sector(0,DIR_TRACK,GAT_SECTOR)
    }
    /// visit every directory entry until the never-used marker
    fn entries(&mut self) -> Result<Vec<Entry>,DYNERR> {
        let mut ans: Vec<Entry> = Vec::new();
        for sector in FIRST_DIR_SECTOR..=LAST_DIR_SECTOR {
            let buf = self.img.read_sector(0,DIR_TRACK,sector)?;
            for slot in 0..ENTRIES_PER_SECTOR {
                let dat = &buf[slot*ENTRY_SIZE..(slot+1)*ENTRY_SIZE];
                match dat[0] {
                    0xff => return Ok(ans),
                    0x00 => continue,
                    _ => ans.push(Entry::from_bytes(dat))
                }
            }
        }
        Ok(ans)
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
    /// the granule chain and the sectors used in the final granule
    fn granule_chain(&mut self,first: u8) -> Result<(Vec<u8>,usize),DYNERR> {
        let gat = self.gat()?;
        let mut ans: Vec<u8> = Vec::new();
        let mut seen = BitVec::from_elem(NUM_GRANULES,false);
        let mut g = first;
        loop {
            if g as usize >= NUM_GRANULES || seen.get(g as usize)==Some(true) {
                error!("granule chain is damaged at {}",g);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
            seen.set(g as usize,true);
            ans.push(g);
            let v = gat[g as usize];
            if v >= LAST_GRANULE_BASE && v <= LAST_GRANULE_BASE + SECTORS_PER_GRANULE as u8 {
                return Ok((ans,(v - LAST_GRANULE_BASE) as usize));
            }
            g = v;
        }
    }
    fn read_granules(&mut self,chain: &[u8],last_sectors: usize,last_sector_bytes: usize) -> Result<Vec<u8>,DYNERR> {
        let mut ans: Vec<u8> = Vec::new();
        for (k,g) in chain.iter().enumerate() {
            let final_granule = k+1==chain.len();
            let sectors = match final_granule { true => last_sectors, false => SECTORS_PER_GRANULE };
            let (track,sector1) = Self::granule_to_ts(*g as usize);
            for s in 0..sectors {
                let mut sec = self.img.read_sector(0,track,sector1+s)?;
                if final_granule && s+1==sectors {
                    sec.truncate(match last_sector_bytes { 0 => 256, n => n });
                }
                ans.append(&mut sec);
            }
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
                let (chain,last_sectors) = self.granule_chain(entry.first_granule)?;
                let data = self.read_granules(&chain,last_sectors,entry.last_sector_bytes)?;
                Ok(fs::File {
                    name: entry.name.to_string(),
                    kind: entry.kind(),
                    data,
                    load_address: None,
                    start_address: None
                })
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn write_file(&mut self,_name: &str,_file: &fs::File) -> STDRESULT {
        error!("writing RSDOS disks is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn delete_file(&mut self,_name: &str) -> STDRESULT {
        error!("writing RSDOS disks is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn rename_file(&mut self,_old_name: &str,_new_name: &str) -> STDRESULT {
        error!("writing RSDOS disks is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn is_valid_filename(&self,name: &str) -> bool {
        let re = regex::Regex::new(FILE_NAME_PATTERN).expect("pattern should compile");
        re.is_match(name)
    }
    fn free(&mut self) -> Result<usize,DYNERR> {
        let gat = self.gat()?;
        let mut granules = 0;
        for g in 0..NUM_GRANULES {
            if gat[g]==GRANULE_FREE {
                granules += 1;
            }
        }
        Ok(granules * SECTORS_PER_GRANULE * 256)
    }
    fn check(&mut self) -> STDRESULT {
        let gat = self.gat()?;
        for g in 0..NUM_GRANULES {
            let v = gat[g];
            let ok = v==GRANULE_FREE
                || (v as usize) < NUM_GRANULES
                || (v >= LAST_GRANULE_BASE && v <= LAST_GRANULE_BASE + SECTORS_PER_GRANULE as u8);
            if !ok {
                error!("GAT byte {} at granule {} is invalid",v,g);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
        }
        // no two files may share a granule
        let mut used = BitVec::from_elem(NUM_GRANULES,false);
        for entry in self.entries()? {
            let (chain,_last) = self.granule_chain(entry.first_granule)?;
            for g in chain {
                if used.get(g as usize)==Some(true) {
                    error!("granule {} belongs to two files",g);
                    return Err(Box::new(fs::Error::FileSystemConsistency));
                }
                used.set(g as usize,true);
            }
        }
        Ok(())
    }
    fn get_file_info(&mut self,name: &str) -> Result<FileInfo,DYNERR> {
        match self.find_entry(name)? {
            Some(entry) => {
                let (chain,last_sectors) = self.granule_chain(entry.first_granule)?;
                let sectors = (chain.len()-1)*SECTORS_PER_GRANULE + last_sectors;
                let size = match sectors {
                    0 => 0,
                    n => (n-1)*256 + match entry.last_sector_bytes { 0 => 256, m => m }
                };
                Ok(FileInfo {
                    name: entry.name.to_string(),
                    kind: entry.kind(),
                    size,
                    sectors,
                    protected: false
                })
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn is_sector_allocated(&mut self,head: usize,track: usize,sector: usize) -> Result<bool,DYNERR> {
        if head != 0 || track >= 35 || sector < 1 || sector > 18 {
            return Err(Box::new(img::Error::SectorNotFound));
        }
        if track==DIR_TRACK {
            return Ok(true);
        }
        let logical = match track < DIR_TRACK { true => track, false => track-1 };
        let granule = logical*2 + (sector-1)/SECTORS_PER_GRANULE;
        let gat = self.gat()?;
        Ok(gat[granule] != GRANULE_FREE)
    }
    fn what_am_i(&self) -> fs::FileSystemType {
        fs::FileSystemType::RsDos
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
