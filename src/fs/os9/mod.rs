//! # OS-9 file system module
//!
//! OS-9 uses the Random Block File manager: LSN 0 identifies the disk
//! (total sectors, allocation map size, root directory), an allocation
//! bitmap follows from LSN 1, and every file or directory is anchored by
//! a file descriptor sector carrying a segment list of up to 48 extents.
//! Directories are ordinary files of 32-byte entries whose names are
//! terminated by a high bit.
//!
//! Unlike the other backends this one is hierarchical: paths like
//! `CMDS/LIST` resolve through subdirectories, and directories can be
//! created and deleted.  File writing stays out of scope.  Executable
//! files are memory modules; see `modules` for the header parser.

pub mod modules;

use bit_vec::BitVec;
use log::{debug,error};
use crate::img;
use crate::fs;
use crate::fs::{FileKind,FileInfo};
use crate::{STDRESULT,DYNERR};

const SECTOR_SIZE: usize = 256;
const ENTRY_SIZE: usize = 32;
const NAME_CAP: usize = 29;
const MAX_SEGMENTS: usize = 48;
const FD_ATT_DIR: u8 = 0x80;
/// attributes of a freshly made directory: directory bit plus full
/// owner and public permissions
const NEW_DIR_ATT: u8 = 0xbf;

const FILE_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_.$]{0,28}$";

/// fields of LSN 0 that this backend uses
pub struct IdSector {
    pub total: usize,
    pub track_size: usize,
    pub map_bytes: usize,
    pub cluster: usize,
    pub root: usize,
    pub name: String
}

impl IdSector {
    fn from_bytes(dat: &[u8]) -> Self {
        let cluster = match u16::from_be_bytes([dat[6],dat[7]]) {
            0 => 1,
            n => n as usize
        };
        Self {
            total: (dat[0] as usize) << 16 | (dat[1] as usize) << 8 | dat[2] as usize,
            track_size: dat[3] as usize,
            map_bytes: u16::from_be_bytes([dat[4],dat[5]]) as usize,
            cluster,
            root: (dat[8] as usize) << 16 | (dat[9] as usize) << 8 | dat[10] as usize,
            name: decode_name(&dat[31..63])
        }
    }
}

/// file descriptor sector fields
pub struct FileDescriptor {
    pub lsn: usize,
    pub attributes: u8,
    pub size: usize,
    pub segments: Vec<(usize,usize)>
}

impl FileDescriptor {
    fn from_bytes(lsn: usize,dat: &[u8]) -> Self {
        let mut segments: Vec<(usize,usize)> = Vec::new();
        for i in 0..MAX_SEGMENTS {
            let offset = 16 + 5*i;
            let start = (dat[offset] as usize) << 16 | (dat[offset+1] as usize) << 8 | dat[offset+2] as usize;
            let count = u16::from_be_bytes([dat[offset+3],dat[offset+4]]) as usize;
            if count==0 {
                break;
            }
            segments.push((start,count));
        }
        Self {
            lsn,
            attributes: dat[0],
            size: u32::from_be_bytes([dat[9],dat[10],dat[11],dat[12]]) as usize,
            segments
        }
    }
    pub fn is_directory(&self) -> bool {
        self.attributes & FD_ATT_DIR != 0
    }
    pub fn sector_count(&self) -> usize {
        self.segments.iter().map(|s| s.1).sum()
    }
}

/// bytes of a name with the final character's high bit set
fn decode_name(dat: &[u8]) -> String {
    let mut ans = String::new();
    for byte in dat {
        if *byte==0 {
            break;
        }
        ans.push((byte & 0x7f) as char);
        if byte & 0x80 != 0 {
            break;
        }
    }
    ans
}

fn encode_name(name: &str,cap: usize) -> Vec<u8> {
    let mut ans: Vec<u8> = name.bytes().take(cap).collect();
    if let Some(last) = ans.last_mut() {
        *last |= 0x80;
    }
    ans.resize(cap,0);
    ans
}

/// The primary interface for disk operations
pub struct Disk {
    img: Box<dyn img::DiskImage>,
    id: IdSector
}

impl Disk {
    pub fn from_img(mut img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        if img.sector_size() != SECTOR_SIZE {
            debug!("OS-9 needs 256 byte sectors");
            return Err(Box::new(fs::Error::UnsupportedGeometry));
        }
        let id = IdSector::from_bytes(&img.read_sector(0,0,1)?);
        let capacity = img.heads()*img.tracks()*img.sectors();
        if id.total==0 || id.total > capacity || id.root==0 || id.root >= id.total {
            debug!("identification sector is not plausible");
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        Ok(Self { img, id })
    }
    /// Test an image for a plausible identification sector
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if img.sector_size() != SECTOR_SIZE {
            return false;
        }
        match img.read_sector(0,0,1) {
            Ok(dat) => {
                let id = IdSector::from_bytes(&dat);
                let capacity = img.heads()*img.tracks()*img.sectors();
                id.total > 0 && id.total <= capacity && id.root > 0 && id.root < id.total && id.map_bytes > 0
            },
            Err(_) => false
        }
    }
    pub fn volume_name(&self) -> &str {
        &self.id.name
    }
    fn read_lsn(&mut self,lsn: usize) -> Result<Vec<u8>,DYNERR> {
        if lsn >= self.id.total {
            error!("LSN {} is beyond the disk",lsn);
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        let per_track = self.img.sectors()*self.img.heads();
        let track = lsn / per_track;
        let rem = lsn % per_track;
        self.img.read_sector(rem/self.img.sectors(),track,rem%self.img.sectors() + 1)
    }
    fn write_lsn(&mut self,lsn: usize,dat: &[u8]) -> STDRESULT {
        if lsn >= self.id.total {
            error!("LSN {} is beyond the disk",lsn);
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        let per_track = self.img.sectors()*self.img.heads();
        let track = lsn / per_track;
        let rem = lsn % per_track;
        self.img.write_sector(rem/self.img.sectors(),track,rem%self.img.sectors() + 1,dat)
    }
    fn descriptor(&mut self,lsn: usize) -> Result<FileDescriptor,DYNERR> {
        let dat = self.read_lsn(lsn)?;
        Ok(FileDescriptor::from_bytes(lsn,&dat))
    }
    /// concatenate the segment list, truncated to the recorded size
    fn content(&mut self,fd: &FileDescriptor) -> Result<Vec<u8>,DYNERR> {
        let mut ans: Vec<u8> = Vec::new();
        for (start,count) in &fd.segments {
            for i in 0..*count {
                let mut sec = self.read_lsn(start + i)?;
                ans.append(&mut sec);
            }
        }
        ans.truncate(fd.size);
        Ok(ans)
    }
    /// live entries of a directory as (name, fd LSN)
    fn dir_entries(&mut self,fd: &FileDescriptor) -> Result<Vec<(String,usize)>,DYNERR> {
        if !fd.is_directory() {
            return Err(Box::new(fs::Error::FileSystemMismatch));
        }
        let dat = self.content(fd)?;
        let mut ans: Vec<(String,usize)> = Vec::new();
        let mut mark = 0;
        while mark + ENTRY_SIZE <= dat.len() {
            let entry = &dat[mark..mark+ENTRY_SIZE];
            if entry[0] != 0 {
                let name = decode_name(&entry[0..NAME_CAP]);
                let lsn = (entry[29] as usize) << 16 | (entry[30] as usize) << 8 | entry[31] as usize;
                ans.push((name,lsn));
            }
            mark += ENTRY_SIZE;
        }
        Ok(ans)
    }
    /// walk a path from the root, returning the descriptor it names
    fn resolve(&mut self,path: &str) -> Result<FileDescriptor,DYNERR> {
        let mut fd = self.descriptor(self.id.root)?;
        for component in path.split('/') {
            if component.is_empty() || component=="." {
                continue;
            }
            let entries = self.dir_entries(&fd)?;
            let mut next: Option<usize> = None;
            for (name,lsn) in entries {
                if name.eq_ignore_ascii_case(component) {
                    next = Some(lsn);
                    break;
                }
            }
            match next {
                Some(lsn) => fd = self.descriptor(lsn)?,
                None => return Err(Box::new(fs::Error::FileNotFound))
            }
        }
        Ok(fd)
    }
    /// allocation bit for an LSN, set meaning allocated
    fn is_allocated_lsn(&mut self,lsn: usize) -> Result<bool,DYNERR> {
        let bit = lsn / self.id.cluster;
        let byte_index = bit / 8;
        if byte_index >= self.id.map_bytes {
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        let map_sector = self.read_lsn(1 + byte_index/SECTOR_SIZE)?;
        Ok(map_sector[byte_index%SECTOR_SIZE] & (0x80 >> (bit%8)) != 0)
    }
    fn set_allocated_lsn(&mut self,lsn: usize,allocated: bool) -> STDRESULT {
        let bit = lsn / self.id.cluster;
        let byte_index = bit / 8;
        if byte_index >= self.id.map_bytes {
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        let mut map_sector = self.read_lsn(1 + byte_index/SECTOR_SIZE)?;
        let mask = 0x80 >> (bit%8);
        match allocated {
            true => map_sector[byte_index%SECTOR_SIZE] |= mask,
            false => map_sector[byte_index%SECTOR_SIZE] &= !mask
        }
        self.write_lsn(1 + byte_index/SECTOR_SIZE,&map_sector)
    }
    fn allocate_lsn(&mut self) -> Result<usize,DYNERR> {
        for lsn in (0..self.id.total).step_by(self.id.cluster) {
            if !self.is_allocated_lsn(lsn)? {
                self.set_allocated_lsn(lsn,true)?;
                return Ok(lsn);
            }
        }
        error!("no free sectors remain");
        Err(Box::new(fs::Error::FileSystemFull))
    }
    /// List the live names in the directory at `path`; the dot entries
    /// are left out.
    pub fn list_files_in(&mut self,path: &str) -> Result<Vec<String>,DYNERR> {
        let fd = self.resolve(path)?;
        let mut ans: Vec<String> = Vec::new();
        for (name,_lsn) in self.dir_entries(&fd)? {
            if name != "." && name != ".." {
                ans.push(name);
            }
        }
        Ok(ans)
    }
    /// Create a directory under an existing one.  The new directory gets
    /// a descriptor sector, one data sector holding the dot entries, and
    /// an entry in its parent.
    pub fn create_directory(&mut self,path: &str) -> STDRESULT {
        if !self.img.is_writeable() {
            return Err(Box::new(fs::Error::FileSystemNotWriteable));
        }
        let (parent_path,leaf) = match path.trim_matches('/').rsplit_once('/') {
            Some((p,l)) => (p.to_string(),l.to_string()),
            None => (String::new(),path.trim_matches('/').to_string())
        };
        if leaf.is_empty() || !self.is_valid_name(&leaf) {
            return Err(Box::new(fs::Error::InvalidFilename));
        }
        let parent = self.resolve(&parent_path)?;
        for (name,_lsn) in self.dir_entries(&parent)? {
            if name.eq_ignore_ascii_case(&leaf) {
                return Err(Box::new(fs::Error::FileExists));
            }
        }
        let fd_lsn = self.allocate_lsn()?;
        let data_lsn = self.allocate_lsn()?;
        // descriptor sector
        let mut fd_sec = vec![0u8;SECTOR_SIZE];
        fd_sec[0] = NEW_DIR_ATT;
        fd_sec[8] = 1;
        fd_sec[9..13].copy_from_slice(&u32::to_be_bytes(2*ENTRY_SIZE as u32));
        fd_sec[16] = (data_lsn >> 16) as u8;
        fd_sec[17] = (data_lsn >> 8) as u8;
        fd_sec[18] = data_lsn as u8;
        fd_sec[19..21].copy_from_slice(&u16::to_be_bytes(1));
        self.write_lsn(fd_lsn,&fd_sec)?;
        // data sector with the dot entries
        let mut data_sec = vec![0u8;SECTOR_SIZE];
        data_sec[0..NAME_CAP].copy_from_slice(&encode_name("..",NAME_CAP));
        data_sec[29] = (parent.lsn >> 16) as u8;
        data_sec[30] = (parent.lsn >> 8) as u8;
        data_sec[31] = parent.lsn as u8;
        data_sec[32..32+NAME_CAP].copy_from_slice(&encode_name(".",NAME_CAP));
        data_sec[61] = (fd_lsn >> 16) as u8;
        data_sec[62] = (fd_lsn >> 8) as u8;
        data_sec[63] = fd_lsn as u8;
        self.write_lsn(data_lsn,&data_sec)?;
        // entry in the parent
        self.insert_entry(&parent,&leaf,fd_lsn)
    }
    /// find a free slot in the parent's data sectors and fill it,
    /// growing the recorded directory size when the slot lies past it
    fn insert_entry(&mut self,parent: &FileDescriptor,name: &str,fd_lsn: usize) -> STDRESULT {
        let mut offset = 0;
        for (start,count) in parent.segments.clone() {
            for i in 0..count {
                let mut sec = self.read_lsn(start + i)?;
                for slot in 0..SECTOR_SIZE/ENTRY_SIZE {
                    let mark = slot*ENTRY_SIZE;
                    let in_use = offset + mark < parent.size && sec[mark] != 0;
                    if !in_use {
                        sec[mark..mark+NAME_CAP].copy_from_slice(&encode_name(name,NAME_CAP));
                        sec[mark+29] = (fd_lsn >> 16) as u8;
                        sec[mark+30] = (fd_lsn >> 8) as u8;
                        sec[mark+31] = fd_lsn as u8;
                        self.write_lsn(start + i,&sec)?;
                        if offset + mark + ENTRY_SIZE > parent.size {
                            let mut fd_sec = self.read_lsn(parent.lsn)?;
                            fd_sec[9..13].copy_from_slice(&u32::to_be_bytes((offset + mark + ENTRY_SIZE) as u32));
                            self.write_lsn(parent.lsn,&fd_sec)?;
                        }
                        return Ok(());
                    }
                }
                offset += SECTOR_SIZE;
            }
        }
        error!("no room left in the directory");
        Err(Box::new(fs::Error::DirectoryFull))
    }
    /// Remove an empty directory: clear the parent entry and free the
    /// descriptor and data sectors.
    pub fn delete_directory(&mut self,path: &str) -> STDRESULT {
        if !self.img.is_writeable() {
            return Err(Box::new(fs::Error::FileSystemNotWriteable));
        }
        let (parent_path,leaf) = match path.trim_matches('/').rsplit_once('/') {
            Some((p,l)) => (p.to_string(),l.to_string()),
            None => (String::new(),path.trim_matches('/').to_string())
        };
        if leaf.is_empty() {
            return Err(Box::new(fs::Error::FileNotFound));
        }
        let parent = self.resolve(&parent_path)?;
        let target = self.resolve(path)?;
        if !target.is_directory() {
            error!("{} is not a directory",path);
            return Err(Box::new(fs::Error::FileSystemMismatch));
        }
        for (name,_lsn) in self.dir_entries(&target)? {
            if name != "." && name != ".." {
                error!("directory {} is not empty",path);
                return Err(Box::new(fs::Error::InvalidFile));
            }
        }
        // clear the parent entry
        let mut cleared = false;
        for (start,count) in parent.segments.clone() {
            for i in 0..count {
                let mut sec = self.read_lsn(start + i)?;
                for slot in 0..SECTOR_SIZE/ENTRY_SIZE {
                    let mark = slot*ENTRY_SIZE;
                    if sec[mark] != 0 && decode_name(&sec[mark..mark+NAME_CAP]).eq_ignore_ascii_case(&leaf) {
                        sec[mark] = 0;
                        self.write_lsn(start + i,&sec)?;
                        cleared = true;
                    }
                }
            }
        }
        if !cleared {
            return Err(Box::new(fs::Error::FileNotFound));
        }
        for (start,count) in target.segments {
            for i in 0..count {
                self.set_allocated_lsn(start + i,false)?;
            }
        }
        self.set_allocated_lsn(target.lsn,false)
    }
    /// parse a file as a memory module
    pub fn read_module(&mut self,path: &str) -> Result<modules::Module,DYNERR> {
        let fd = self.resolve(path)?;
        if fd.is_directory() {
            return Err(Box::new(fs::Error::FileSystemMismatch));
        }
        let dat = self.content(&fd)?;
        modules::Module::from_bytes(&dat)
    }
    fn is_valid_name(&self,name: &str) -> bool {
        let re = regex::Regex::new(FILE_NAME_PATTERN).expect("pattern should compile");
        re.is_match(name)
    }
    /// depth-limited recursive walk used by check
    fn check_dir(&mut self,fd: &FileDescriptor,used: &mut BitVec,depth: usize) -> STDRESULT {
        if depth > 16 {
            error!("directory tree is too deep to be real");
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        for (name,lsn) in self.dir_entries(fd)? {
            if name=="." || name==".." {
                continue;
            }
            if lsn >= self.id.total {
                error!("entry {} points beyond the disk",name);
                return Err(Box::new(fs::Error::FileSystemConsistency));
            }
            let child = self.descriptor(lsn)?;
            self.claim(child.lsn,used)?;
            for (start,count) in &child.segments {
                for i in 0..*count {
                    self.claim(start + i,used)?;
                }
            }
            if child.is_directory() {
                self.check_dir(&child,used,depth+1)?;
            }
        }
        Ok(())
    }
    /// mark an LSN as referenced, demanding it be inside the disk,
    /// unshared, and allocated in the bitmap
    fn claim(&mut self,lsn: usize,used: &mut BitVec) -> STDRESULT {
        if lsn >= self.id.total {
            error!("LSN {} is beyond the disk",lsn);
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        if used.get(lsn)==Some(true) {
            error!("LSN {} is claimed twice",lsn);
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        used.set(lsn,true);
        if !self.is_allocated_lsn(lsn)? {
            error!("LSN {} is referenced but free in the bitmap",lsn);
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        Ok(())
    }
}

impl fs::DiskFS for Disk {
    fn list_files(&mut self) -> Result<Vec<String>,DYNERR> {
        self.list_files_in("")
    }
    fn file_exists(&mut self,name: &str) -> Result<bool,DYNERR> {
        match self.resolve(name) {
            Ok(_) => Ok(true),
            Err(e) => match e.downcast_ref::<fs::Error>() {
                Some(fs::Error::FileNotFound) => Ok(false),
                _ => Err(e)
            }
        }
    }
    fn read_file(&mut self,name: &str) -> Result<fs::File,DYNERR> {
        let fd = self.resolve(name)?;
        let data = self.content(&fd)?;
        let kind = match (fd.is_directory(),data.len() >= 2 && data[0..2]==modules::MODULE_SYNC) {
            (true,_) => FileKind::Directory,
            (false,true) => FileKind::Module,
            (false,false) => FileKind::Data
        };
        Ok(fs::File {
            name: fs::get_file_name(name).to_string(),
            kind,
            data,
            load_address: None,
            start_address: None
        })
    }
    fn write_file(&mut self,_name: &str,_file: &fs::File) -> STDRESULT {
        error!("writing OS-9 files is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn delete_file(&mut self,_name: &str) -> STDRESULT {
        error!("deleting OS-9 files is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn rename_file(&mut self,_old_name: &str,_new_name: &str) -> STDRESULT {
        error!("renaming OS-9 files is not supported");
        Err(Box::new(fs::Error::UnsupportedOperation))
    }
    fn is_valid_filename(&self,name: &str) -> bool {
        self.is_valid_name(name)
    }
    fn free(&mut self) -> Result<usize,DYNERR> {
        let mut clear = 0;
        for lsn in (0..self.id.total).step_by(self.id.cluster) {
            if !self.is_allocated_lsn(lsn)? {
                clear += 1;
            }
        }
        Ok(clear * self.id.cluster * SECTOR_SIZE)
    }
    fn check(&mut self) -> STDRESULT {
        let mut used = BitVec::from_elem(self.id.total,false);
        used.set(0,true);
        for lsn in 1..=(self.id.map_bytes + SECTOR_SIZE - 1)/SECTOR_SIZE {
            used.set(lsn,true);
        }
        let root = self.descriptor(self.id.root)?;
        if !root.is_directory() {
            error!("root descriptor is not a directory");
            return Err(Box::new(fs::Error::FileSystemConsistency));
        }
        self.claim(root.lsn,&mut used)?;
        for (start,count) in &root.segments {
            for i in 0..*count {
                self.claim(start + i,&mut used)?;
            }
        }
        self.check_dir(&root,&mut used,0)
    }
    fn get_file_info(&mut self,name: &str) -> Result<FileInfo,DYNERR> {
        let fd = self.resolve(name)?;
        let kind = match fd.is_directory() {
            true => FileKind::Directory,
            false => FileKind::Data
        };
        Ok(FileInfo {
            name: fs::get_file_name(name).to_string(),
            kind,
            size: fd.size,
            sectors: fd.sector_count(),
            protected: fd.attributes & 0x02 == 0
        })
    }
    fn is_sector_allocated(&mut self,head: usize,track: usize,sector: usize) -> Result<bool,DYNERR> {
        if head >= self.img.heads() || track >= self.img.tracks() || sector < 1 || sector > self.img.sectors() {
            return Err(Box::new(img::Error::SectorNotFound));
        }
        let lsn = track*self.img.sectors()*self.img.heads() + head*self.img.sectors() + sector - 1;
        if lsn >= self.id.total {
            return Ok(false);
        }
        self.is_allocated_lsn(lsn)
    }
    fn what_am_i(&self) -> fs::FileSystemType {
        fs::FileSystemType::Os9
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
