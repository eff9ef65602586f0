//! # Disk Image Module
//!
//! Disk images are represented by objects implementing the `DiskImage`
//! trait.  The object type is named for the image type that it handles,
//! e.g., `Hfe`.  All backends expose the same sector-addressable view:
//! heads and tracks count from 0, sectors count from 1, and every sector
//! on a disk has the same declared size.
//!
//! ## Backends
//!
//! * `jvc` and `vdk` are flat images: a short header followed by the
//!   decoded sector payloads in geometric order.
//! * `hfe` and `dmk` are track images: each track carries the WD279X
//!   record structure (address marks, ID records, CRC) and sectors are
//!   found by walking the track.
//! * `memory` is a headerless in-memory disk used for scratch work and
//!   as the target of filesystem formatting.
//!
//! ## Relation to File Systems
//!
//! The `DiskImage` trait object serves as the underlying storage for the
//! `fs` modules.  Those modules interpret sectors; this module never
//! does.  A filesystem that caches sectors can watch `write_epoch`,
//! which increments after every successful sector write.

pub mod crc;
pub mod mfm;
pub mod jvc;
pub mod vdk;
pub mod memory;
pub mod hfe;
pub mod dmk;

use std::fmt;
use std::str::FromStr;
use crate::{STDRESULT,DYNERR};

/// Enumerates disk image errors.  The `Display` trait will print the
/// equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("unknown image type")]
    UnknownImageType,
    #[error("image type not compatible with request")]
    ImageTypeMismatch,
    #[error("geometry unsupported by this image type")]
    UnsupportedGeometry,
    #[error("image format is invalid")]
    ImageFormat,
    #[error("sector not found")]
    SectorNotFound,
    #[error("disk is not writeable")]
    DiskNotWriteable,
    #[error("sector CRC did not match")]
    CrcMismatch,
    #[error("ran off the end of the track")]
    EndOfTrack
}

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum DiskImageType {
    JVC,
    VDK,
    HFE,
    DMK,
    MEM
}

impl FromStr for DiskImageType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "jvc" | "dsk" => Ok(Self::JVC),
            "vdk" => Ok(Self::VDK),
            "hfe" => Ok(Self::HFE),
            "dmk" => Ok(Self::DMK),
            _ => Err(Error::UnknownImageType)
        }
    }
}

impl fmt::Display for DiskImageType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JVC => write!(f,"jvc"),
            Self::VDK => write!(f,"vdk"),
            Self::HFE => write!(f,"hfe"),
            Self::DMK => write!(f,"dmk"),
            Self::MEM => write!(f,"mem")
        }
    }
}

/// Value-type key identifying a sector on a disk
#[derive(PartialEq,Eq,Clone,Copy,Hash)]
pub struct SectorId {
    pub head: usize,
    pub track: usize,
    pub sector: usize
}

impl fmt::Display for SectorId {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"head {} track {} sector {}",self.head,self.track,self.sector)
    }
}

/// A sector payload with its identity.  Track images also carry the
/// record CRC as read from the track.
pub struct Sector {
    pub id: SectorId,
    pub data: Vec<u8>,
    pub crc: Option<u16>
}

impl Sector {
    /// Verify the stored CRC against the data record, when there is one.
    /// This is an opt-in pass; reads never fail on a bad CRC, since
    /// legitimately damaged images would become unreadable.
    pub fn crc_ok(&self) -> Option<bool> {
        match self.crc {
            Some(stored) => {
                let mut crc = crc::Crc16::new();
                crc.add_slice(&[0xa1,0xa1,0xa1,0xfb]);
                crc.add_slice(&self.data);
                Some(crc.value() == stored)
            },
            None => None
        }
    }
}

/// sector size code as stored in a WD279X ID record
pub fn size_code(sector_size: usize) -> u8 {
    match sector_size {
        128 => 0,
        256 => 1,
        512 => 2,
        1024 => 3,
        _ => panic!("sector size {} is not representable",sector_size)
    }
}

pub fn size_from_code(code: u8) -> usize {
    128 << (code & 3) as usize
}

/// verify a geometry that all backends can hold
pub fn check_geometry(heads: usize,tracks: usize,sectors: usize,sector_size: usize) -> STDRESULT {
    if heads<1 || heads>2 || tracks<1 || tracks>255 || sectors<1 || sectors>255 {
        log::error!("geometry {}/{}/{} is out of range",heads,tracks,sectors);
        return Err(Box::new(Error::UnsupportedGeometry));
    }
    match sector_size {
        128 | 256 | 512 | 1024 => Ok(()),
        _ => {
            log::error!("sector size {} is unsupported",sector_size);
            Err(Box::new(Error::UnsupportedGeometry))
        }
    }
}

/// If a data source is smaller than `quantum` bytes, pad it with zeros.
/// If it is larger, do not include the extra bytes.
pub fn quantize(src: &[u8],quantum: usize) -> Vec<u8> {
    let mut padded: Vec<u8> = Vec::new();
    for i in 0..quantum {
        if i < src.len() {
            padded.push(src[i]);
        } else {
            padded.push(0);
        }
    }
    padded
}

/// The main trait for working with any kind of disk image.
/// The corresponding trait object serves as storage for `DiskFS`.
/// Reading can mutate the object because track images may keep
/// track of the head position or other status indicators.
pub trait DiskImage {
    fn heads(&self) -> usize;
    fn tracks(&self) -> usize;
    /// sectors per track per head
    fn sectors(&self) -> usize;
    fn sector_size(&self) -> usize;
    fn is_writeable(&self) -> bool;
    fn what_am_i(&self) -> DiskImageType;
    fn file_extensions(&self) -> Vec<String>;
    /// Counter that increments after every successful sector write and
    /// before control returns to the caller.  Filesystems use this to
    /// invalidate sector caches no matter which path wrote the disk.
    fn write_epoch(&self) -> u64;
    /// Read a sector payload; `sector` counts from 1
    fn read_sector(&mut self,head: usize,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR>;
    /// Read a sector into the start of `buf`; partial copies are allowed
    /// in either direction.
    fn read_sector_into(&mut self,head: usize,track: usize,sector: usize,buf: &mut [u8]) -> STDRESULT {
        let dat = self.read_sector(head,track,sector)?;
        let n = usize::min(buf.len(),dat.len());
        buf[..n].copy_from_slice(&dat[..n]);
        Ok(())
    }
    /// Write a sector payload, truncating or padding to the declared size
    fn write_sector(&mut self,head: usize,track: usize,sector: usize,dat: &[u8]) -> STDRESULT;
    fn sector_exists(&mut self,head: usize,track: usize,sector: usize) -> bool;
    /// Every sector id on the disk in (head,track,sector) order
    fn sector_ids(&self) -> Vec<SectorId> {
        let mut ans: Vec<SectorId> = Vec::new();
        for head in 0..self.heads() {
            for track in 0..self.tracks() {
                for sector in 1..=self.sectors() {
                    ans.push(SectorId { head, track, sector });
                }
            }
        }
        ans
    }
    /// Flatten the image, this is the persistence boundary
    fn to_bytes(&mut self) -> Vec<u8>;
}

/// Lazy iteration over every sector of a disk; payloads are copied out
/// one at a time, so large disks are not duplicated wholesale.
pub struct SectorIter<'a> {
    img: &'a mut dyn DiskImage,
    ids: std::vec::IntoIter<SectorId>
}

impl <'a> SectorIter<'a> {
    pub fn new(img: &'a mut dyn DiskImage) -> Self {
        let ids = img.sector_ids().into_iter();
        Self {
            img,
            ids
        }
    }
}

impl <'a> Iterator for SectorIter<'a> {
    type Item = Result<Sector,DYNERR>;
    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        match self.img.read_sector(id.head,id.track,id.sector) {
            Ok(data) => Some(Ok(Sector { id, data, crc: None })),
            Err(e) => Some(Err(e))
        }
    }
}
