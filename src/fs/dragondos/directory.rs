//! Cached image of a DragonDos directory track.
//!
//! The cache is a row-major copy of the track's 18 sectors on head 0.
//! Sectors 1-2 hold the allocation bitmap (bit clear means allocated)
//! and the geometry bytes; sectors 3-18 hold the 160 directory entries.

use log::debug;
use crate::img;
use crate::{STDRESULT,DYNERR};
use super::types::*;

pub struct DirectoryTrack {
    buf: Vec<u8>
}

impl DirectoryTrack {
    /// an all-free bitmap with every entry slot empty, as used by format
    pub fn blank(tracks: usize,heads: usize) -> Self {
        let mut ans = Self {
            buf: vec![0;SECTORS_PER_HEAD*SECTOR_SIZE]
        };
        for row in 0..2 {
            for i in 0..BITMAP_BYTES {
                ans.buf[row*SECTOR_SIZE + i] = 0xff;
            }
        }
        ans.set_geometry(tracks,SECTORS_PER_HEAD*heads);
        for idx in 0..NUM_ENTRIES {
            ans.set_entry(idx,&DirectoryEntry::empty());
        }
        ans
    }
    pub fn from_img(img: &mut Box<dyn img::DiskImage>,track: usize) -> Result<Self,DYNERR> {
        let mut buf: Vec<u8> = Vec::with_capacity(SECTORS_PER_HEAD*SECTOR_SIZE);
        for sector in 1..=SECTORS_PER_HEAD {
            buf.append(&mut img.read_sector(0,track,sector)?);
        }
        Ok(Self { buf })
    }
    pub fn store(&self,img: &mut Box<dyn img::DiskImage>,track: usize) -> STDRESULT {
        for sector in 1..=SECTORS_PER_HEAD {
            img.write_sector(0,track,sector,&self.buf[(sector-1)*SECTOR_SIZE..sector*SECTOR_SIZE])?;
        }
        Ok(())
    }
    pub fn entry(&self,idx: usize) -> DirectoryEntry {
        let offset = (2 + idx/ENTRIES_PER_SECTOR)*SECTOR_SIZE + (idx%ENTRIES_PER_SECTOR)*ENTRY_SIZE;
        DirectoryEntry::from_bytes(&self.buf[offset..offset+ENTRY_SIZE])
    }
    pub fn set_entry(&mut self,idx: usize,entry: &DirectoryEntry) {
        let offset = (2 + idx/ENTRIES_PER_SECTOR)*SECTOR_SIZE + (idx%ENTRIES_PER_SECTOR)*ENTRY_SIZE;
        self.buf[offset..offset+ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
    }
    /// check the geometry bytes and their complements at the end of the
    /// first allocation sector
    pub fn geometry_matches(&self,tracks: usize,sectors_per_track: usize) -> bool {
        let bytes = &self.buf[252..256];
        if bytes[0] as usize != tracks || bytes[1] as usize != sectors_per_track {
            debug!("geometry bytes {}/{} do not match disk {}/{}",bytes[0],bytes[1],tracks,sectors_per_track);
            return false;
        }
        if bytes[2] != !bytes[0] || bytes[3] != !bytes[1] {
            debug!("geometry byte complements do not check");
            return false;
        }
        true
    }
    pub fn set_geometry(&mut self,tracks: usize,sectors_per_track: usize) {
        self.buf[252] = tracks as u8;
        self.buf[253] = sectors_per_track as u8;
        self.buf[254] = !(tracks as u8);
        self.buf[255] = !(sectors_per_track as u8);
    }
    /// bit clear means allocated
    pub fn is_allocated(&self,lsn: usize) -> bool {
        let (row,bit) = match lsn {
            l if l < 8*BITMAP_BYTES => (0,l),
            l => (1,l - 8*BITMAP_BYTES)
        };
        self.buf[row*SECTOR_SIZE + bit/8] & (1 << (bit%8)) == 0
    }
    pub fn set_allocated(&mut self,lsn: usize,allocated: bool) {
        let (row,bit) = match lsn {
            l if l < 8*BITMAP_BYTES => (0,l),
            l => (1,l - 8*BITMAP_BYTES)
        };
        let mask = 1 << (bit%8);
        match allocated {
            true => self.buf[row*SECTOR_SIZE + bit/8] &= !mask,
            false => self.buf[row*SECTOR_SIZE + bit/8] |= mask
        }
    }
    pub fn free_sectors(&self,total: usize) -> usize {
        let mut ans = 0;
        for lsn in 0..total {
            if !self.is_allocated(lsn) {
                ans += 1;
            }
        }
        ans
    }
    pub fn sector(&self,sector: usize) -> &[u8] {
        &self.buf[(sector-1)*SECTOR_SIZE..sector*SECTOR_SIZE]
    }
}
