//! # DragonDos file system module
//!
//! DragonDos keeps its directory on track 20 with a byte-exact mirror on
//! track 16, both on head 0.  The first two sectors of the directory
//! track hold the allocation bitmap and the geometry bytes; the other
//! sixteen hold 160 directory entries of 25 bytes.  A file is a chain of
//! entries (one main entry, then extension entries linked by index),
//! each carrying extents of contiguous logical sectors.
//!
//! The directory track is cached.  The cache is invalidated by watching
//! the disk's write epoch, so a write into the directory track by any
//! path forces a re-read before the next directory access.

pub mod types;
mod directory;

use bit_vec::BitVec;
use log::{debug,error};
use regex::Regex;
use types::*;
use directory::DirectoryTrack;
use crate::img;
use crate::fs;
use crate::fs::{FileName,FileKind,FileInfo};
use crate::{STDRESULT,DYNERR};

/// filenames are 1+1-7 characters, optionally a dot and 0-3 more
const FILE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9-]{1,7}(\.[A-Za-z0-9]{0,3})?$";

/// The primary interface for disk operations
pub struct Disk {
    img: Box<dyn img::DiskImage>,
    dir: DirectoryTrack,
    /// disk write epoch at the time the cache was read
    epoch: u64
}

impl Disk {
    /// Create a disk file system using the given image as storage.
    /// The DiskFS takes ownership of the image.
    pub fn from_img(mut img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        Self::check_geometry(&img)?;
        let dir = DirectoryTrack::from_img(&mut img,DIRECTORY_TRACK)?;
        if !dir.geometry_matches(img.tracks(),SECTORS_PER_HEAD*img.heads()) {
            error!("allocation sector geometry does not match the disk");
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        let epoch = img.write_epoch();
        Ok(Self {
            img,
            dir,
            epoch
        })
    }
    /// Format the image and mount it: zero the data sectors, lay down
    /// empty directories on both directory tracks, free the whole bitmap
    /// except the directory sectors, and record the geometry bytes.
    pub fn initialize(mut img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        Self::check_geometry(&img)?;
        let heads = img.heads();
        let tracks = img.tracks();
        for head in 0..heads {
            for track in 0..tracks {
                if head==0 && (track==DIRECTORY_TRACK || track==BACKUP_TRACK) {
                    continue;
                }
                for sector in 1..=SECTORS_PER_HEAD {
                    img.write_sector(head,track,sector,&[0;SECTOR_SIZE])?;
                }
            }
        }
        let mut dir = DirectoryTrack::blank(tracks,heads);
        for track in [DIRECTORY_TRACK,BACKUP_TRACK] {
            for sector in 1..=SECTORS_PER_HEAD {
                dir.set_allocated(track*SECTORS_PER_HEAD*heads + sector - 1,true);
            }
        }
        dir.store(&mut img,DIRECTORY_TRACK)?;
        dir.store(&mut img,BACKUP_TRACK)?;
        Self::from_img(img)
    }
    /// Test an image to see if it already carries DragonDos
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if Self::check_geometry(img).is_err() {
            return false;
        }
        match DirectoryTrack::from_img(img,DIRECTORY_TRACK) {
            Ok(dir) => dir.geometry_matches(img.tracks(),SECTORS_PER_HEAD*img.heads()),
            Err(_) => false
        }
    }
    fn check_geometry(img: &Box<dyn img::DiskImage>) -> STDRESULT {
        let ok = (img.tracks()==40 || img.tracks()==80)
            && (img.heads()==1 || img.heads()==2)
            && img.sectors()==SECTORS_PER_HEAD
            && img.sector_size()==SECTOR_SIZE;
        if !ok {
            debug!("DragonDos needs 40 or 80 tracks of 18 x 256, image has {}x{}x{}x{}",
                img.heads(),img.tracks(),img.sectors(),img.sector_size());
            return Err(Box::new(fs::Error::UnsupportedGeometry));
        }
        Ok(())
    }
    /// re-read the directory cache if the disk was written since
    fn refresh(&mut self) -> STDRESULT {
        if self.img.write_epoch() != self.epoch {
            debug!("directory cache is stale, re-reading");
            self.dir = DirectoryTrack::from_img(&mut self.img,DIRECTORY_TRACK)?;
            self.epoch = self.img.write_epoch();
        }
        Ok(())
    }
    /// write the cache to the directory track and its mirror
    fn save_directory(&mut self) -> STDRESULT {
        self.dir.store(&mut self.img,DIRECTORY_TRACK)?;
        // mark the cache clean so the second write does not force a re-read
        self.epoch = self.img.write_epoch();
        self.dir.store(&mut self.img,BACKUP_TRACK)?;
        self.epoch = self.img.write_epoch();
        Ok(())
    }
    fn sectors_per_track(&self) -> usize {
        SECTORS_PER_HEAD * self.img.heads()
    }
    fn total_sectors(&self) -> usize {
        self.img.tracks() * self.sectors_per_track()
    }
    pub fn lsn(&self,head: usize,track: usize,sector: usize) -> usize {
        track*self.sectors_per_track() + head*SECTORS_PER_HEAD + sector - 1
    }
    pub fn lsn_to_hts(&self,lsn: usize) -> Result<(usize,usize,usize),DYNERR> {
        if lsn >= self.total_sectors() {
            error!("LSN {} is beyond the disk",lsn);
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        let spt = self.sectors_per_track();
        let track = lsn / spt;
        let rem = lsn % spt;
        Ok((rem/SECTORS_PER_HEAD,track,rem%SECTORS_PER_HEAD + 1))
    }
    /// Index of the main entry matching the name, None if absent.
    /// Comparison is case-insensitive unless the caller opts out.
    pub fn find_main_entry(&mut self,name: &str,case_sensitive: bool) -> Result<Option<usize>,DYNERR> {
        self.refresh()?;
        let want = FileName::from_path(name);
        for idx in 0..NUM_ENTRIES {
            let entry = self.dir.entry(idx);
            if entry.is_valid() && entry.is_main() {
                let have = entry.file_name();
                let hit = match case_sensitive {
                    true => have==want,
                    false => have.matches(&want)
                };
                if hit {
                    return Ok(Some(idx));
                }
            }
        }
        Ok(None)
    }
    /// Walk the chain starting at a main entry.  Returns the entry
    /// indices, the accumulated extents, and the last sector size byte.
    fn entry_chain(&self,idx: usize) -> Result<(Vec<usize>,Vec<Extent>,u8),DYNERR> {
        let mut indices: Vec<usize> = Vec::new();
        let mut extents: Vec<Extent> = Vec::new();
        let mut cursor = idx;
        loop {
            if indices.contains(&cursor) {
                error!("directory chain loops through entry {}",cursor);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
            let entry = self.dir.entry(cursor);
            if !entry.is_valid() {
                error!("directory chain reaches invalid entry {}",cursor);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
            indices.push(cursor);
            extents.extend(entry.extents.iter().copied());
            if !entry.more_extensions() {
                return Ok((indices,extents,entry.tail));
            }
            cursor = entry.tail as usize;
            if cursor >= NUM_ENTRIES {
                error!("directory chain runs off the table");
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
        }
    }
    fn file_size(sectors: usize,last_sector_size: u8) -> usize {
        match sectors {
            0 => 0,
            n => (n-1)*SECTOR_SIZE + match last_sector_size { 0 => SECTOR_SIZE, m => m as usize }
        }
    }
    /// read the raw content of a chain, truncating the final sector
    fn read_extents(&mut self,extents: &[Extent],last_sector_size: u8) -> Result<Vec<u8>,DYNERR> {
        let total: usize = extents.iter().map(|x| x.count).sum();
        let mut ans: Vec<u8> = Vec::new();
        let mut count = 0;
        for x in extents {
            for i in 0..x.count {
                let (head,track,sector) = self.lsn_to_hts(x.lsn + i)?;
                let mut sec = self.img.read_sector(head,track,sector)?;
                count += 1;
                if count==total {
                    sec.truncate(match last_sector_size { 0 => SECTOR_SIZE, m => m as usize });
                }
                ans.append(&mut sec);
            }
        }
        Ok(ans)
    }
    /// Greedy extent allocation.  A single contiguous run that can hold
    /// the whole file wins; otherwise the longest runs are gathered until
    /// the need is met.  Extent counts are capped at 255 by the entry
    /// format.
    fn find_free_extents(&self,needed: usize) -> Result<Vec<Extent>,DYNERR> {
        let total = self.total_sectors();
        let mut runs: Vec<Extent> = Vec::new();
        let mut lsn = 0;
        while lsn < total {
            if self.dir.is_allocated(lsn) {
                lsn += 1;
                continue;
            }
            let start = lsn;
            while lsn < total && !self.dir.is_allocated(lsn) {
                lsn += 1;
            }
            runs.push(Extent { lsn: start, count: lsn - start });
        }
        if needed <= 255 {
            if let Some(run) = runs.iter().find(|r| r.count >= needed) {
                return Ok(vec![Extent { lsn: run.lsn, count: needed }]);
            }
        }
        runs.sort_by(|a,b| b.count.cmp(&a.count));
        let mut ans: Vec<Extent> = Vec::new();
        let mut still = needed;
        for run in runs {
            let mut lsn = run.lsn;
            let mut avail = run.count;
            while still > 0 && avail > 0 {
                let take = usize::min(usize::min(avail,still),255);
                ans.push(Extent { lsn, count: take });
                lsn += take;
                avail -= take;
                still -= take;
            }
            if still==0 {
                break;
            }
        }
        if still > 0 {
            error!("no extent chain can hold {} sectors",needed);
            return Err(Box::new(fs::Error::FileSystemFull));
        }
        Ok(ans)
    }
    /// free (invalid) entry indices in index order
    fn find_free_entries(&self,wanted: usize) -> Result<Vec<usize>,DYNERR> {
        let mut ans: Vec<usize> = Vec::new();
        for idx in 0..NUM_ENTRIES {
            if !self.dir.entry(idx).is_valid() {
                ans.push(idx);
                if ans.len()==wanted {
                    return Ok(ans);
                }
            }
        }
        error!("directory cannot hold {} more entries",wanted);
        Err(Box::new(fs::Error::DirectoryFull))
    }
}

impl fs::DiskFS for Disk {
    fn list_files(&mut self) -> Result<Vec<String>,DYNERR> {
        self.refresh()?;
        let mut ans: Vec<String> = Vec::new();
        for idx in 0..NUM_ENTRIES {
            let entry = self.dir.entry(idx);
            if entry.is_valid() && entry.is_main() {
                ans.push(entry.file_name().to_string());
            }
        }
        Ok(ans)
    }
    fn file_exists(&mut self,name: &str) -> Result<bool,DYNERR> {
        Ok(self.find_main_entry(name,false)?.is_some())
    }
    fn read_file(&mut self,name: &str) -> Result<fs::File,DYNERR> {
        match self.find_main_entry(name,false)? {
            Some(idx) => {
                let display = self.dir.entry(idx).file_name().to_string();
                let (_indices,extents,last_sector_size) = self.entry_chain(idx)?;
                let raw = self.read_extents(&extents,last_sector_size)?;
                Ok(decode_file(&display,raw))
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn write_file(&mut self,name: &str,file: &fs::File) -> STDRESULT {
        if !self.is_valid_filename(name) {
            return Err(Box::new(fs::Error::InvalidFilename));
        }
        if self.find_main_entry(name,false)?.is_some() {
            return Err(Box::new(fs::Error::FileExists));
        }
        if !self.img.is_writeable() {
            return Err(Box::new(fs::Error::FileSystemNotWriteable));
        }
        let raw = encode_file(file);
        let needed = (raw.len() + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let last_sector_size = match needed {
            0 => 0,
            n => raw.len() - (n-1)*SECTOR_SIZE
        };
        let extents = match needed {
            0 => Vec::new(),
            n => self.find_free_extents(n)?
        };
        let entry_count = match extents.len() {
            e if e > MAIN_EXTENTS => 1 + (e + 2)/EXTENSION_EXTENTS,
            _ => 1
        };
        let indices = self.find_free_entries(entry_count)?;
        // payload goes out first, marking the bitmap as we go
        let mut mark = 0;
        for x in &extents {
            for i in 0..x.count {
                let (head,track,sector) = self.lsn_to_hts(x.lsn + i)?;
                let end = usize::min(mark + SECTOR_SIZE,raw.len());
                self.img.write_sector(head,track,sector,&raw[mark..end])?;
                self.dir.set_allocated(x.lsn + i,true);
                mark += SECTOR_SIZE;
            }
        }
        // then the entry chain
        let fname = FileName::from_path(name);
        let mut cursor = 0;
        for (k,idx) in indices.iter().enumerate() {
            let cap = match k { 0 => MAIN_EXTENTS, _ => EXTENSION_EXTENTS };
            let mut entry = DirectoryEntry::empty();
            entry.flags = match k { 0 => 0, _ => FLAG_EXTENSION };
            if k==0 {
                entry.set_file_name(&fname);
            }
            let end = usize::min(cursor + cap,extents.len());
            entry.extents = extents[cursor..end].to_vec();
            cursor = end;
            if k+1 < indices.len() {
                entry.flags |= FLAG_MORE_EXTENSIONS;
                entry.tail = indices[k+1] as u8;
            } else {
                entry.tail = (last_sector_size % SECTOR_SIZE) as u8;
            }
            self.dir.set_entry(*idx,&entry);
        }
        self.save_directory()
    }
    fn delete_file(&mut self,name: &str) -> STDRESULT {
        if !self.img.is_writeable() {
            return Err(Box::new(fs::Error::FileSystemNotWriteable));
        }
        match self.find_main_entry(name,false)? {
            Some(idx) => {
                let (indices,extents,_last) = self.entry_chain(idx)?;
                for k in indices {
                    let mut entry = self.dir.entry(k);
                    entry.flags |= FLAG_INVALID;
                    self.dir.set_entry(k,&entry);
                }
                for x in extents {
                    for i in 0..x.count {
                        self.dir.set_allocated(x.lsn + i,false);
                    }
                }
                self.save_directory()
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn rename_file(&mut self,old_name: &str,new_name: &str) -> STDRESULT {
        if !self.is_valid_filename(new_name) {
            return Err(Box::new(fs::Error::InvalidFilename));
        }
        if !self.img.is_writeable() {
            return Err(Box::new(fs::Error::FileSystemNotWriteable));
        }
        match self.find_main_entry(old_name,false)? {
            Some(idx) => {
                if self.find_main_entry(new_name,false)?.is_some() {
                    return Err(Box::new(fs::Error::FileExists));
                }
                let mut entry = self.dir.entry(idx);
                entry.set_file_name(&FileName::from_path(new_name));
                self.dir.set_entry(idx,&entry);
                self.save_directory()
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn is_valid_filename(&self,name: &str) -> bool {
        let re = Regex::new(FILE_NAME_PATTERN).expect("pattern should compile");
        re.is_match(name)
    }
    fn free(&mut self) -> Result<usize,DYNERR> {
        self.refresh()?;
        Ok(self.dir.free_sectors(self.total_sectors()) * SECTOR_SIZE)
    }
    fn check(&mut self) -> STDRESULT {
        let primary = DirectoryTrack::from_img(&mut self.img,DIRECTORY_TRACK)?;
        let backup = DirectoryTrack::from_img(&mut self.img,BACKUP_TRACK)?;
        for sector in 1..=SECTORS_PER_HEAD {
            if primary.sector(sector) != backup.sector(sector) {
                error!("directory mirror differs in sector {}",sector);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
        }
        let total = self.total_sectors();
        let mut used = BitVec::from_elem(total,false);
        let mut seen = BitVec::from_elem(NUM_ENTRIES,false);
        for track in [DIRECTORY_TRACK,BACKUP_TRACK] {
            for sector in 1..=SECTORS_PER_HEAD {
                used.set(self.lsn(0,track,sector),true);
            }
        }
        for idx in 0..NUM_ENTRIES {
            let entry = primary.entry(idx);
            if !entry.is_valid() || !entry.is_main() {
                continue;
            }
            let mut cursor = idx;
            loop {
                if seen.get(cursor)==Some(true) {
                    error!("entry {} appears in two chains",cursor);
                    return Err(Box::new(fs::Error::FileSystemConsistency));
                }
                seen.set(cursor,true);
                let link = primary.entry(cursor);
                if !link.is_valid() {
                    error!("chain from entry {} reaches invalid entry {}",idx,cursor);
                    return Err(Box::new(fs::Error::FileSystemConsistency));
                }
                for x in &link.extents {
                    for i in 0..x.count {
                        let lsn = x.lsn + i;
                        if lsn >= total || used.get(lsn)==Some(true) {
                            error!("LSN {} is allocated twice",lsn);
                            return Err(Box::new(fs::Error::FileSystemConsistency));
                        }
                        used.set(lsn,true);
                    }
                }
                if !link.more_extensions() {
                    break;
                }
                cursor = link.tail as usize;
                if cursor >= NUM_ENTRIES {
                    error!("chain from entry {} runs off the table",idx);
                    return Err(Box::new(fs::Error::FileSystemConsistency));
                }
            }
        }
        // every referenced sector must be marked in the bitmap; the
        // reverse (allocated but unreferenced) is tolerated
        for lsn in 0..total {
            if used.get(lsn)==Some(true) && !primary.is_allocated(lsn) {
                error!("LSN {} is referenced but free in the bitmap",lsn);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
        }
        Ok(())
    }
    fn get_file_info(&mut self,name: &str) -> Result<FileInfo,DYNERR> {
        match self.find_main_entry(name,false)? {
            Some(idx) => {
                let entry = self.dir.entry(idx);
                let (_indices,extents,last_sector_size) = self.entry_chain(idx)?;
                let sectors: usize = extents.iter().map(|x| x.count).sum();
                let kind = match sectors {
                    0 => FileKind::Data,
                    _ => {
                        let (head,track,sector) = self.lsn_to_hts(extents[0].lsn)?;
                        let first = self.img.read_sector(head,track,sector)?;
                        match first[0]==FILE_HEADER_LEAD && first[8]==FILE_HEADER_TRAIL {
                            true => match first[1] {
                                1 => FileKind::Basic,
                                2 => FileKind::MachineCode,
                                _ => FileKind::Data
                            },
                            false => FileKind::Data
                        }
                    }
                };
                Ok(FileInfo {
                    name: entry.file_name().to_string(),
                    kind,
                    size: Self::file_size(sectors,last_sector_size),
                    sectors,
                    protected: entry.is_protected()
                })
            },
            None => Err(Box::new(fs::Error::FileNotFound))
        }
    }
    fn is_sector_allocated(&mut self,head: usize,track: usize,sector: usize) -> Result<bool,DYNERR> {
        self.refresh()?;
        if head >= self.img.heads() || track >= self.img.tracks() || sector < 1 || sector > SECTORS_PER_HEAD {
            return Err(Box::new(img::Error::SectorNotFound));
        }
        let lsn = self.lsn(head,track,sector);
        Ok(self.dir.is_allocated(lsn))
    }
    fn what_am_i(&self) -> fs::FileSystemType {
        fs::FileSystemType::DragonDos
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
