//! ## In-memory disk
//!
//! A headerless sector store with explicit geometry.  Useful as scratch
//! storage, as the target of filesystem formatting, and in tests.  The
//! flattened form is simply the payload bytes in geometric order, which
//! also makes it a headerless JVC dump for the default geometries.

use log::{trace,error};
use crate::img;
use crate::img::DiskImage;
use crate::{STDRESULT,DYNERR};

/// In-memory disk with explicit geometry
pub struct Memory {
    heads: usize,
    tracks: usize,
    sectors: usize,
    sector_size: usize,
    epoch: u64,
    data: Vec<u8>
}

impl Memory {
    pub fn create(heads: usize,tracks: usize,sectors: usize,sector_size: usize) -> Result<Self,DYNERR> {
        img::check_geometry(heads,tracks,sectors,sector_size)?;
        Ok(Self {
            heads,
            tracks,
            sectors,
            sector_size,
            epoch: 0,
            data: vec![0;heads*tracks*sectors*sector_size]
        })
    }
    fn sector_offset(&self,head: usize,track: usize,sector: usize) -> usize {
        (track*self.sectors*self.heads + head*self.sectors + sector - 1) * self.sector_size
    }
    fn check_bounds(&self,head: usize,track: usize,sector: usize) -> STDRESULT {
        if head>=self.heads || track>=self.tracks || sector<1 || sector>self.sectors {
            error!("range should be 0-{}/0-{}/1-{}",self.heads-1,self.tracks-1,self.sectors);
            return Err(Box::new(img::Error::SectorNotFound));
        }
        Ok(())
    }
}

impl DiskImage for Memory {
    fn heads(&self) -> usize {
        self.heads
    }
    fn tracks(&self) -> usize {
        self.tracks
    }
    fn sectors(&self) -> usize {
        self.sectors
    }
    fn sector_size(&self) -> usize {
        self.sector_size
    }
    fn is_writeable(&self) -> bool {
        true
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::MEM
    }
    fn file_extensions(&self) -> Vec<String> {
        Vec::new()
    }
    fn write_epoch(&self) -> u64 {
        self.epoch
    }
    fn read_sector(&mut self,head: usize,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        trace!("reading {}/{}/{}",head,track,sector);
        self.check_bounds(head,track,sector)?;
        let offset = self.sector_offset(head,track,sector);
        Ok(self.data[offset..offset+self.sector_size].to_vec())
    }
    fn write_sector(&mut self,head: usize,track: usize,sector: usize,dat: &[u8]) -> STDRESULT {
        trace!("writing {}/{}/{}",head,track,sector);
        self.check_bounds(head,track,sector)?;
        let offset = self.sector_offset(head,track,sector);
        let padded = img::quantize(dat,self.sector_size);
        self.data[offset..offset+self.sector_size].copy_from_slice(&padded);
        self.epoch += 1;
        Ok(())
    }
    fn sector_exists(&mut self,head: usize,track: usize,sector: usize) -> bool {
        head<self.heads && track<self.tracks && sector>=1 && sector<=self.sectors
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        self.data.clone()
    }
}
