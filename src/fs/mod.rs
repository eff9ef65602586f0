//! # File System Module
//!
//! File system modules handle interactions with directories and files.
//! There is a sub-module for each supported file system.
//!
//! File systems are represented by the `DiskFS` trait.  The trait object
//! takes ownership of some disk image, which it uses as storage.  Files
//! are represented by the `File` structure, a filesystem-agnostic record
//! of the payload and whatever addresses the filesystem keeps with it.
//!
//! DragonDos has the full read-write treatment.  RSDOS, FLEX and OS-9
//! decode their own directory structures far enough to list, read, and
//! check; OS-9 additionally walks its directory hierarchy and parses
//! memory-module headers.

pub mod dragondos;
pub mod rsdos;
pub mod flex;
pub mod os9;

use std::fmt;
use std::str::FromStr;
use crate::img;
use crate::{STDRESULT,DYNERR};

/// Enumerates file system errors.  The `Display` trait will print the
/// equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("file system not compatible with request")]
    FileSystemMismatch,
    #[error("geometry unsupported by this file system")]
    UnsupportedGeometry,
    #[error("file system is inconsistent")]
    FileSystemConsistency,
    #[error("file not found")]
    FileNotFound,
    #[error("file already exists")]
    FileExists,
    #[error("invalid filename")]
    InvalidFilename,
    #[error("file structure is invalid")]
    InvalidFile,
    #[error("file system is full")]
    FileSystemFull,
    #[error("directory is full")]
    DirectoryFull,
    #[error("file system is not writeable")]
    FileSystemNotWriteable,
    #[error("operation not supported by this file system")]
    UnsupportedOperation,
    #[error("unknown file system type")]
    UnknownFileSystemType
}

/// Identifier used by the filesystem factory
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum FileSystemType {
    DragonDos,
    RsDos,
    Os9,
    Flex
}

impl FromStr for FileSystemType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "dragondos" | "ddos" => Ok(Self::DragonDos),
            "rsdos" => Ok(Self::RsDos),
            "os9" => Ok(Self::Os9),
            "flex" => Ok(Self::Flex),
            _ => Err(Error::UnknownFileSystemType)
        }
    }
}

impl fmt::Display for FileSystemType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DragonDos => write!(f,"dragondos"),
            Self::RsDos => write!(f,"rsdos"),
            Self::Os9 => write!(f,"os9"),
            Self::Flex => write!(f,"flex")
        }
    }
}

/// Broad classification of a file's content, as far as the filesystems
/// here record one.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum FileKind {
    Data,
    Basic,
    MachineCode,
    Text,
    Directory,
    Module
}

impl fmt::Display for FileKind {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f,"data"),
            Self::Basic => write!(f,"basic"),
            Self::MachineCode => write!(f,"machine code"),
            Self::Text => write!(f,"text"),
            Self::Directory => write!(f,"directory"),
            Self::Module => write!(f,"module")
        }
    }
}

/// A file materialized by `read_file`, or assembled by a caller for
/// `write_file`.  The payload is always a private copy.  Load and start
/// addresses exist only for file kinds that carry them on disk.
pub struct File {
    pub name: String,
    pub kind: FileKind,
    pub data: Vec<u8>,
    pub load_address: Option<u16>,
    pub start_address: Option<u16>
}

impl File {
    pub fn new_data(name: &str,data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            kind: FileKind::Data,
            data,
            load_address: None,
            start_address: None
        }
    }
    pub fn new_basic(name: &str,data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            kind: FileKind::Basic,
            data,
            load_address: Some(0),
            start_address: Some(0)
        }
    }
    pub fn new_machine_code(name: &str,data: Vec<u8>,load_address: u16,start_address: u16) -> Self {
        Self {
            name: name.to_string(),
            kind: FileKind::MachineCode,
            data,
            load_address: Some(load_address),
            start_address: Some(start_address)
        }
    }
}

/// File metadata as a filesystem reports it
pub struct FileInfo {
    pub name: String,
    pub kind: FileKind,
    /// exact byte length where the filesystem records one
    pub size: usize,
    pub sectors: usize,
    pub protected: bool
}

/// Filesystem-agnostic name manipulation: the last path component split
/// into a base and an optional extension.
#[derive(PartialEq,Clone)]
pub struct FileName {
    pub base: String,
    pub extension: String
}

impl FileName {
    pub fn from_path(path: &str) -> Self {
        let last = match path.rsplit('/').next() {
            Some(s) => s,
            None => path
        };
        match last.rsplit_once('.') {
            Some((base,ext)) => Self {
                base: base.to_string(),
                extension: ext.to_string()
            },
            None => Self {
                base: last.to_string(),
                extension: String::new()
            }
        }
    }
    /// case-insensitive comparison, the usual rule on these systems
    pub fn matches(&self,other: &FileName) -> bool {
        self.base.eq_ignore_ascii_case(&other.base) &&
            self.extension.eq_ignore_ascii_case(&other.extension)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extension.len() {
            0 => write!(f,"{}",self.base),
            _ => write!(f,"{}.{}",self.base,self.extension)
        }
    }
}

/// strip any path prefix and return the structured file name
pub fn get_file_name(path: &str) -> FileName {
    FileName::from_path(path)
}

/// Abstract file system interface.  Presumed to own an underlying
/// `DiskImage`.  Backends without write support return
/// `UnsupportedOperation` from the mutating calls.
pub trait DiskFS {
    fn list_files(&mut self) -> Result<Vec<String>,DYNERR>;
    fn file_exists(&mut self,name: &str) -> Result<bool,DYNERR>;
    fn read_file(&mut self,name: &str) -> Result<File,DYNERR>;
    fn write_file(&mut self,name: &str,file: &File) -> STDRESULT;
    fn delete_file(&mut self,name: &str) -> STDRESULT;
    fn rename_file(&mut self,old_name: &str,new_name: &str) -> STDRESULT;
    fn is_valid_filename(&self,name: &str) -> bool;
    /// free space in bytes
    fn free(&mut self) -> Result<usize,DYNERR>;
    /// consistency check, Ok means the filesystem is sound
    fn check(&mut self) -> STDRESULT;
    fn get_file_info(&mut self,name: &str) -> Result<FileInfo,DYNERR>;
    fn is_sector_allocated(&mut self,head: usize,track: usize,sector: usize) -> Result<bool,DYNERR>;
    fn what_am_i(&self) -> FileSystemType;
    /// Mutably borrow the underlying disk image
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_from_path() {
        let fname = get_file_name("dir/sub/HELLO.BIN");
        assert_eq!(fname.base,"HELLO");
        assert_eq!(fname.extension,"BIN");
        assert_eq!(fname.to_string(),"HELLO.BIN");
    }

    #[test]
    fn file_name_without_extension() {
        let fname = get_file_name("HELLO");
        assert_eq!(fname.base,"HELLO");
        assert_eq!(fname.extension,"");
        assert_eq!(fname.to_string(),"HELLO");
    }

    #[test]
    fn file_name_matching() {
        let a = get_file_name("hello.bin");
        let b = get_file_name("HELLO.BIN");
        assert!(a.matches(&b));
    }
}
