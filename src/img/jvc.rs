//! ## Support for JVC sector dumps
//!
//! JVC images are a sequential dump of decoded sector data with an
//! optional header of up to 5 bytes.  The header size is recovered from
//! the file length modulo 256 (or modulo 257 when the per-sector
//! attribute byte is in play); absent fields take the classic defaults
//! of 18 sectors, 1 head, 256 byte sectors.  The usual extension is DSK.

use log::{trace,debug,error};
use crate::img;
use crate::img::DiskImage;
use crate::{STDRESULT,DYNERR};

pub fn file_extensions() -> Vec<String> {
    vec!["dsk".to_string(),"jvc".to_string()]
}

/// Wrapper for JVC data
pub struct Jvc {
    heads: usize,
    tracks: usize,
    sectors: usize,
    sector_size: usize,
    header_size: usize,
    /// each sector is preceded by an attribute byte
    attributes: bool,
    epoch: u64,
    data: Vec<u8>
}

impl Jvc {
    pub fn create(heads: usize,tracks: usize,sectors: usize,sector_size: usize) -> Result<Self,DYNERR> {
        img::check_geometry(heads,tracks,sectors,sector_size)?;
        // the size code always goes in header byte 2, byte 3 is the first sector id
        let header = vec![sectors as u8,heads as u8,img::size_code(sector_size),1,0];
        let mut data = header;
        data.append(&mut vec![0;heads*tracks*sectors*sector_size]);
        Ok(Self {
            heads,
            tracks,
            sectors,
            sector_size,
            header_size: 5,
            attributes: false,
            epoch: 0,
            data
        })
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        let mut header_size = buf.len() % 256;
        let mut attributes = false;
        if header_size == 5 && buf[4] != 0 {
            // flag says attribute bytes are present, so the header has to
            // be recovered modulo 257
            if buf.len() % 257 != 5 {
                debug!("attribute flag set but size is not consistent");
                return Err(Box::new(img::Error::ImageFormat));
            }
            attributes = true;
        } else if header_size > 5 {
            header_size = buf.len() % 257;
            if header_size != 5 || buf[4] == 0 {
                debug!("JVC header size {} could not be resolved",buf.len() % 256);
                return Err(Box::new(img::Error::ImageFormat));
            }
            attributes = true;
        }
        let sectors = match header_size { h if h>=1 => buf[0] as usize, _ => 18 };
        let heads = match header_size { h if h>=2 => buf[1] as usize, _ => 1 };
        let sector_size = match header_size { h if h>=3 => img::size_from_code(buf[2]), _ => 256 };
        if sectors==0 || heads<1 || heads>2 {
            debug!("JVC header geometry {} sectors, {} heads rejected",sectors,heads);
            return Err(Box::new(img::Error::ImageFormat));
        }
        let cell = sector_size + attributes as usize;
        let payload = buf.len() - header_size;
        if payload % (heads*sectors*cell) != 0 {
            debug!("payload is not a whole number of tracks");
            return Err(Box::new(img::Error::ImageFormat));
        }
        let tracks = payload / (heads*sectors*cell);
        if tracks==0 {
            return Err(Box::new(img::Error::ImageFormat));
        }
        debug!("JVC geometry {} heads, {} tracks, {} sectors x {} bytes",heads,tracks,sectors,sector_size);
        Ok(Self {
            heads,
            tracks,
            sectors,
            sector_size,
            header_size,
            attributes,
            epoch: 0,
            data: buf.to_vec()
        })
    }
    fn sector_offset(&self,head: usize,track: usize,sector: usize) -> usize {
        let cell = self.sector_size + self.attributes as usize;
        let idx = track*self.sectors*self.heads + head*self.sectors + sector - 1;
        self.header_size + idx*cell + self.attributes as usize
    }
    fn check_bounds(&self,head: usize,track: usize,sector: usize) -> STDRESULT {
        if head>=self.heads || track>=self.tracks || sector<1 || sector>self.sectors {
            error!("range should be 0-{}/0-{}/1-{}",self.heads-1,self.tracks-1,self.sectors);
            return Err(Box::new(img::Error::SectorNotFound));
        }
        Ok(())
    }
}

impl DiskImage for Jvc {
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
        img::DiskImageType::JVC
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_reopen() {
        let mut disk = Jvc::create(1,35,18,256).expect("bad geometry");
        disk.write_sector(0,34,18,&[7;256]).expect("write failed");
        let flat = disk.to_bytes();
        let mut disk2 = Jvc::from_bytes(&flat).expect("could not reopen");
        assert_eq!(disk2.heads(),1);
        assert_eq!(disk2.tracks(),35);
        assert_eq!(disk2.sectors(),18);
        assert_eq!(disk2.sector_size(),256);
        assert_eq!(disk2.read_sector(0,34,18).expect("read failed"),vec![7;256]);
    }

    #[test]
    fn headerless_defaults() {
        // bare payload for 40 tracks of 18 x 256
        let buf = vec![0;40*18*256];
        let disk = Jvc::from_bytes(&buf).expect("could not open");
        assert_eq!(disk.tracks,40);
        assert_eq!(disk.heads,1);
        assert_eq!(disk.sector_size,256);
    }

    #[test]
    fn truncate_and_pad() {
        let mut disk = Jvc::create(1,40,18,256).expect("bad geometry");
        disk.write_sector(0,0,1,&[1,2,3]).expect("write failed");
        let back = disk.read_sector(0,0,1).expect("read failed");
        assert_eq!(&back[0..4],&[1,2,3,0]);
        disk.write_sector(0,0,2,&vec![5;300]).expect("write failed");
        let back = disk.read_sector(0,0,2).expect("read failed");
        assert_eq!(back.len(),256);
        assert_eq!(back[255],5);
    }

    #[test]
    fn out_of_range() {
        let mut disk = Jvc::create(2,40,18,256).expect("bad geometry");
        assert!(disk.read_sector(0,0,0).is_err());
        assert!(disk.read_sector(0,0,19).is_err());
        assert!(disk.read_sector(2,0,1).is_err());
        assert!(disk.read_sector(0,40,1).is_err());
        assert!(disk.sector_exists(1,39,18));
    }
}
