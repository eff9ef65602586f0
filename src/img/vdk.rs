//! ## Support for VDK disk images
//!
//! VDK is the flat image format of the PC-Dragon emulator: a header of
//! at least 12 bytes beginning with the ASCII signature `dk`, followed
//! by the decoded sector payloads.  The sector layout is fixed at 18
//! sectors of 256 bytes; tracks and sides come from the header.

use std::io::Cursor;
use binrw::{binrw,BinReaderExt,BinWriterExt};
use log::{trace,debug,error};
use crate::img;
use crate::img::DiskImage;
use crate::{STDRESULT,DYNERR};

pub fn file_extensions() -> Vec<String> {
    vec!["vdk".to_string()]
}

pub const SECTORS: usize = 18;
pub const SECTOR_SIZE: usize = 256;
const WRITE_PROTECT_FLAG: u8 = 0x01;

/// The fixed 12-byte prefix of the VDK header.  The recorded header
/// length can be larger, in which case the extra bytes (disk name and
/// the like) are preserved but not interpreted.
#[binrw]
#[brw(little,magic = b"dk")]
pub struct Header {
    pub header_len: u16,
    pub version: u8,
    pub compat_version: u8,
    pub source_id: u8,
    pub source_version: u8,
    pub tracks: u8,
    pub sides: u8,
    pub flags: u8,
    pub name_len: u8
}

/// Wrapper for VDK data
pub struct Vdk {
    header: Header,
    heads: usize,
    tracks: usize,
    epoch: u64,
    data: Vec<u8>
}

impl Vdk {
    pub fn create(heads: usize,tracks: usize) -> Result<Self,DYNERR> {
        img::check_geometry(heads,tracks,SECTORS,SECTOR_SIZE)?;
        let header = Header {
            header_len: 12,
            version: 0x10,
            compat_version: 0x10,
            source_id: 0,
            source_version: 0,
            tracks: tracks as u8,
            sides: heads as u8,
            flags: 0,
            name_len: 0
        };
        let mut cur = Cursor::new(Vec::new());
        cur.write_le(&header)?;
        let mut data = cur.into_inner();
        data.append(&mut vec![0;heads*tracks*SECTORS*SECTOR_SIZE]);
        Ok(Self {
            header,
            heads,
            tracks,
            epoch: 0,
            data
        })
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len() < 12 {
            debug!("file too short to be VDK");
            return Err(Box::new(img::Error::ImageFormat));
        }
        let mut cur = Cursor::new(buf);
        let header: Header = cur.read_le()?;
        let header_len = header.header_len as usize;
        if header_len < 12 || header_len > buf.len() {
            debug!("VDK header length {} is invalid",header_len);
            return Err(Box::new(img::Error::ImageFormat));
        }
        let heads = header.sides as usize;
        let tracks = header.tracks as usize;
        if heads<1 || heads>2 || tracks<1 {
            debug!("VDK geometry {} sides, {} tracks rejected",heads,tracks);
            return Err(Box::new(img::Error::ImageFormat));
        }
        if buf.len() - header_len != heads*tracks*SECTORS*SECTOR_SIZE {
            debug!("VDK payload does not match geometry");
            return Err(Box::new(img::Error::ImageFormat));
        }
        debug!("VDK geometry {} heads, {} tracks",heads,tracks);
        Ok(Self {
            header,
            heads,
            tracks,
            epoch: 0,
            data: buf.to_vec()
        })
    }
    fn sector_offset(&self,head: usize,track: usize,sector: usize) -> usize {
        let idx = track*SECTORS*self.heads + head*SECTORS + sector - 1;
        self.header.header_len as usize + idx*SECTOR_SIZE
    }
    fn check_bounds(&self,head: usize,track: usize,sector: usize) -> STDRESULT {
        if head>=self.heads || track>=self.tracks || sector<1 || sector>SECTORS {
            error!("range should be 0-{}/0-{}/1-{}",self.heads-1,self.tracks-1,SECTORS);
            return Err(Box::new(img::Error::SectorNotFound));
        }
        Ok(())
    }
}

impl DiskImage for Vdk {
    fn heads(&self) -> usize {
        self.heads
    }
    fn tracks(&self) -> usize {
        self.tracks
    }
    fn sectors(&self) -> usize {
        SECTORS
    }
    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }
    fn is_writeable(&self) -> bool {
        self.header.flags & WRITE_PROTECT_FLAG == 0
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::VDK
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn write_epoch(&self) -> u64 {
        self.epoch
    }
    fn read_sector(&mut self,head: usize,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        trace!("reading {}/{}/{}",head,track,sector);
        self.check_bounds(head,track,sector)?;
        let offset = self.sector_offset(head,track,sector);
        Ok(self.data[offset..offset+SECTOR_SIZE].to_vec())
    }
    fn write_sector(&mut self,head: usize,track: usize,sector: usize,dat: &[u8]) -> STDRESULT {
        trace!("writing {}/{}/{}",head,track,sector);
        if !self.is_writeable() {
            error!("VDK image is write protected");
            return Err(Box::new(img::Error::DiskNotWriteable));
        }
        self.check_bounds(head,track,sector)?;
        let offset = self.sector_offset(head,track,sector);
        let padded = img::quantize(dat,SECTOR_SIZE);
        self.data[offset..offset+SECTOR_SIZE].copy_from_slice(&padded);
        self.epoch += 1;
        Ok(())
    }
    fn sector_exists(&mut self,head: usize,track: usize,sector: usize) -> bool {
        head<self.heads && track<self.tracks && sector>=1 && sector<=SECTORS
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_reopen() {
        let mut disk = Vdk::create(2,40).expect("bad geometry");
        disk.write_sector(1,39,18,&[9;256]).expect("write failed");
        let flat = disk.to_bytes();
        assert_eq!(&flat[0..2],b"dk");
        let mut disk2 = Vdk::from_bytes(&flat).expect("could not reopen");
        assert_eq!(disk2.heads(),2);
        assert_eq!(disk2.tracks(),40);
        assert_eq!(disk2.read_sector(1,39,18).expect("read failed"),vec![9;256]);
    }

    #[test]
    fn reject_bad_magic() {
        let buf = vec![0;12 + 40*18*256];
        assert!(Vdk::from_bytes(&buf).is_err());
    }

    #[test]
    fn write_protect() {
        let mut disk = Vdk::create(1,40).expect("bad geometry");
        let mut flat = disk.to_bytes();
        flat[10] |= WRITE_PROTECT_FLAG;
        let mut disk2 = Vdk::from_bytes(&flat).expect("could not reopen");
        assert!(!disk2.is_writeable());
        assert!(disk2.write_sector(0,0,1,&[0;256]).is_err());
    }
}
