//! ## Support for DMK disk images
//!
//! DMK is the TRS-80 oriented format that keeps the track byte layout
//! while storing already-decoded bytes.  A 16-byte file header is
//! followed by fixed-length encoded tracks; each track begins with 80
//! bytes of little-endian IDAM pointers (bit 15 is a density flag and is
//! masked off, a zero pointer ends the list).
//!
//! Unlike HFE there is no MFM layer and the GAP2 before a data record
//! carries no A1 sync bytes, so the reader looks for 12 consecutive zero
//! bytes and then the data address mark.  Do not confuse the two sync
//! disciplines.

use std::io::Cursor;
use binrw::{binrw,BinReaderExt};
use log::{trace,debug,error};
use crate::img;
use crate::img::DiskImage;
use crate::img::crc::Crc16;
use crate::{STDRESULT,DYNERR};

pub fn file_extensions() -> Vec<String> {
    vec!["dmk".to_string()]
}

const OFFSET_TABLE_SIZE: usize = 80;
const SINGLE_SIDED_FLAG: u8 = 0x10;
const IDAM: u8 = 0xfe;

#[binrw]
#[brw(little)]
pub struct Header {
    pub write_protect: u8,
    pub tracks: u8,
    pub track_len: u16,
    pub flags: u8,
    pub reserved: [u8;11]
}

/// Wrapper for DMK data
pub struct Dmk {
    header: Header,
    heads: usize,
    sectors: usize,
    sector_size: usize,
    epoch: u64,
    data: Vec<u8>
}

impl Dmk {
    /// The source never wrote DMK images; neither do we.
    pub fn create(_heads: usize,_tracks: usize,_sectors: usize,_sector_size: usize) -> Result<Self,DYNERR> {
        error!("creating DMK images is not implemented");
        Err(Box::new(img::Error::ImageTypeMismatch))
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len() < 16 {
            debug!("file too short to be DMK");
            return Err(Box::new(img::Error::ImageFormat));
        }
        let mut cur = Cursor::new(buf);
        let header: Header = cur.read_le()?;
        let heads = match header.flags & SINGLE_SIDED_FLAG { 0 => 2, _ => 1 };
        let tracks = header.tracks as usize;
        let track_len = header.track_len as usize;
        if tracks==0 || track_len <= OFFSET_TABLE_SIZE {
            debug!("DMK geometry {} tracks x {} bytes rejected",tracks,track_len);
            return Err(Box::new(img::Error::ImageFormat));
        }
        if buf.len() != 16 + tracks*heads*track_len {
            debug!("DMK payload does not match geometry");
            return Err(Box::new(img::Error::ImageFormat));
        }
        let mut ans = Self {
            header,
            heads,
            sectors: 0,
            sector_size: 0,
            epoch: 0,
            data: buf.to_vec()
        };
        // discover the sector layout from track 0 head 0
        let ids = ans.track_ids(0,0)?;
        if ids.is_empty() {
            debug!("no ID records on track 0");
            return Err(Box::new(img::Error::ImageFormat));
        }
        ans.sectors = ids.len();
        ans.sector_size = img::size_from_code(ids[0][3]);
        debug!("DMK geometry {} heads, {} tracks, {} sectors x {} bytes",
            heads,tracks,ans.sectors,ans.sector_size);
        Ok(ans)
    }
    fn track_start(&self,track: usize,head: usize) -> usize {
        16 + (track*self.heads + head) * self.header.track_len as usize
    }
    /// IDAM pointers for a track, already masked
    fn offsets(&self,track: usize,head: usize) -> Vec<usize> {
        let start = self.track_start(track,head);
        let mut ans: Vec<usize> = Vec::new();
        for i in 0..OFFSET_TABLE_SIZE/2 {
            let ptr = u16::from_le_bytes([self.data[start+2*i],self.data[start+2*i+1]]);
            if ptr == 0 {
                break;
            }
            ans.push((ptr & 0x7fff) as usize);
        }
        ans
    }
    /// every ID record on the track as (track,head,sector,size code)
    fn track_ids(&self,track: usize,head: usize) -> Result<Vec<[u8;4]>,DYNERR> {
        let start = self.track_start(track,head);
        let track_len = self.header.track_len as usize;
        let mut ans: Vec<[u8;4]> = Vec::new();
        for off in self.offsets(track,head) {
            if off + 7 > track_len || self.data[start+off] != IDAM {
                debug!("bad IDAM pointer {} on track {}",off,track);
                return Err(Box::new(img::Error::ImageFormat));
            }
            ans.push([
                self.data[start+off+1],
                self.data[start+off+2],
                self.data[start+off+3],
                self.data[start+off+4]
            ]);
        }
        Ok(ans)
    }
    /// Find the data record for the wanted sector.  Returns the offset of
    /// the data address mark within the track and the payload size.
    fn find_data(&self,track: usize,head: usize,sector: usize) -> Result<(usize,usize),DYNERR> {
        if track >= self.header.tracks as usize || head >= self.heads {
            return Err(Box::new(img::Error::SectorNotFound));
        }
        let start = self.track_start(track,head);
        let track_len = self.header.track_len as usize;
        for off in self.offsets(track,head) {
            if off + 7 > track_len || self.data[start+off] != IDAM {
                continue;
            }
            let id = &self.data[start+off+1..start+off+5];
            if id[0] as usize != track || id[1] as usize != head || id[2] as usize != sector {
                continue;
            }
            let size = img::size_from_code(id[3]);
            // GAP2 has no sync bytes here, wait for 12 zeros then the mark
            let mut zeros = 0;
            let mut pos = off + 7;
            while pos < track_len {
                let byte = self.data[start+pos];
                if byte == 0 {
                    zeros += 1;
                } else if zeros >= 12 && byte >= 0xf8 && byte <= 0xfb {
                    if pos + 1 + size + 2 > track_len {
                        return Err(Box::new(img::Error::EndOfTrack));
                    }
                    return Ok((pos,size));
                } else {
                    zeros = 0;
                }
                pos += 1;
            }
            error!("ID record was not followed by a data record");
            return Err(Box::new(img::Error::EndOfTrack));
        }
        debug!("no ID record matched {}/{}/{}",head,track,sector);
        Err(Box::new(img::Error::SectorNotFound))
    }
}

impl DiskImage for Dmk {
    fn heads(&self) -> usize {
        self.heads
    }
    fn tracks(&self) -> usize {
        self.header.tracks as usize
    }
    fn sectors(&self) -> usize {
        self.sectors
    }
    fn sector_size(&self) -> usize {
        self.sector_size
    }
    fn is_writeable(&self) -> bool {
        self.header.write_protect == 0
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::DMK
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn write_epoch(&self) -> u64 {
        self.epoch
    }
    fn read_sector(&mut self,head: usize,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        trace!("reading {}/{}/{}",head,track,sector);
        let (dam,size) = self.find_data(track,head,sector)?;
        let start = self.track_start(track,head);
        Ok(self.data[start+dam+1..start+dam+1+size].to_vec())
    }
    fn write_sector(&mut self,head: usize,track: usize,sector: usize,dat: &[u8]) -> STDRESULT {
        trace!("writing {}/{}/{}",head,track,sector);
        if !self.is_writeable() {
            error!("DMK image is write protected");
            return Err(Box::new(img::Error::DiskNotWriteable));
        }
        let (dam,size) = self.find_data(track,head,sector)?;
        let start = self.track_start(track,head);
        let padded = img::quantize(dat,size);
        let mut crc = Crc16::new();
        crc.add_slice(&[0xa1,0xa1,0xa1,self.data[start+dam]]);
        crc.add_slice(&padded);
        self.data[start+dam+1..start+dam+1+size].copy_from_slice(&padded);
        let [hi,lo] = u16::to_be_bytes(crc.value());
        self.data[start+dam+1+size] = hi;
        self.data[start+dam+1+size+1] = lo;
        self.epoch += 1;
        Ok(())
    }
    fn sector_exists(&mut self,head: usize,track: usize,sector: usize) -> bool {
        self.find_data(track,head,sector).is_ok()
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::crc::crc16;

    const TRACK_LEN: usize = 2000;

    /// assemble a single-density-free DMK track with the given sectors
    fn build_track(track: u8,head: u8,sectors: u8,size: usize) -> Vec<u8> {
        let mut buf = vec![0u8;OFFSET_TABLE_SIZE];
        let mut table: Vec<u16> = Vec::new();
        for s in 1..=sectors {
            for _i in 0..10 {
                buf.push(0x4e);
            }
            table.push(buf.len() as u16 | 0x8000);
            let code = img::size_code(size);
            buf.push(IDAM);
            buf.append(&mut vec![track,head,s,code]);
            let crc = crc16(&[0xa1,0xa1,0xa1,IDAM,track,head,s,code]);
            buf.append(&mut u16::to_be_bytes(crc).to_vec());
            for _i in 0..22 {
                buf.push(0x4e);
            }
            for _i in 0..12 {
                buf.push(0);
            }
            buf.push(0xfb);
            let payload = vec![s;size];
            let mut rec = vec![0xa1,0xa1,0xa1,0xfb];
            rec.append(&mut payload.clone());
            buf.append(&mut payload.clone());
            buf.append(&mut u16::to_be_bytes(crc16(&rec)).to_vec());
        }
        for (i,ptr) in table.iter().enumerate() {
            buf[2*i..2*i+2].copy_from_slice(&u16::to_le_bytes(*ptr));
        }
        buf.resize(TRACK_LEN,0x4e);
        buf
    }

    fn build_image(tracks: u8,sectors: u8) -> Vec<u8> {
        let mut buf = vec![0u8;16];
        buf[1] = tracks;
        buf[2..4].copy_from_slice(&u16::to_le_bytes(TRACK_LEN as u16));
        buf[4] = SINGLE_SIDED_FLAG;
        for t in 0..tracks {
            buf.append(&mut build_track(t,0,sectors,256));
        }
        buf
    }

    #[test]
    fn open_and_read() {
        let mut disk = Dmk::from_bytes(&build_image(3,5)).expect("could not open");
        assert_eq!(disk.heads(),1);
        assert_eq!(disk.tracks(),3);
        assert_eq!(disk.sectors(),5);
        assert_eq!(disk.sector_size(),256);
        assert_eq!(disk.read_sector(0,2,4).expect("read failed"),vec![4;256]);
        assert!(disk.sector_exists(0,2,5));
        assert!(!disk.sector_exists(0,2,6));
    }

    #[test]
    fn write_and_read_back() {
        let mut disk = Dmk::from_bytes(&build_image(2,5)).expect("could not open");
        disk.write_sector(0,1,2,&[0xaa;256]).expect("write failed");
        assert_eq!(disk.read_sector(0,1,2).expect("read failed"),vec![0xaa;256]);
        // the rewritten CRC should also verify
        let epoch = disk.write_epoch();
        assert_eq!(epoch,1);
    }

    #[test]
    fn create_is_unimplemented() {
        assert!(Dmk::create(1,40,18,256).is_err());
    }
}
