//! ## Support for HFE disk images
//!
//! HFE is the HxC floppy emulator format.  The file is divided into
//! 512-byte blocks: block 0 is the header, block 1 the track list, and
//! the rest hold MFM-encoded track data.  Within a track's blocks the
//! two sides are interleaved, the first 256 bytes of each block belonging
//! to side 0 and the last 256 to side 1.
//!
//! Only the variant a Dragon or CoCo would produce is handled: revision
//! 0, ISOIBM MFM encoding, the GENERIC_SHUGART_DD interface mode, and 1
//! or 2 sides.  Anything else is refused at open.
//!
//! Layering is `RawTrack` (deinterleave) -> `MfmStream` (decode) ->
//! `Track` (WD279X records).  Writing a sector overwrites the payload and
//! CRC of an existing data record; tracks only grow at format time.

use std::io::Cursor;
use binrw::{binrw,BinReaderExt,BinWriterExt};
use log::{trace,debug,error};
use crate::img;
use crate::img::DiskImage;
use crate::img::crc::Crc16;
use crate::img::mfm::MfmStream;
use crate::{STDRESULT,DYNERR};

pub fn file_extensions() -> Vec<String> {
    vec!["hfe".to_string()]
}

pub const BLOCK_SIZE: usize = 512;
const HALF_BLOCK: usize = 256;
pub const ENCODING_ISOIBM_MFM: u8 = 0x00;
pub const MODE_GENERIC_SHUGART_DD: u8 = 0x07;
pub const BIT_RATE: u16 = 250;
/// sector id spacing when a track is laid down
pub const DEFAULT_INTERLEAVE: usize = 9;
const GAP_BYTE: u8 = 0x4e;
const IDAM: u8 = 0xfe;
const DAM: u8 = 0xfb;

/// Header occupying the start of block 0; the rest of the block is
/// filled with 0xFF.
#[binrw]
#[brw(little,magic = b"HXCPICFE")]
pub struct Header {
    pub revision: u8,
    pub tracks: u8,
    pub sides: u8,
    pub encoding: u8,
    pub bit_rate: u16,
    pub rpm: u16,
    pub mode: u8,
    pub dnu: u8,
    pub track_list_block: u16,
    pub write_allowed: u8,
    pub single_step: u8,
    pub t0s0_alt_encoding: u8,
    pub t0s0_encoding: u8,
    pub t0s1_alt_encoding: u8,
    pub t0s1_encoding: u8
}

/// Linear single-side view over a track's interleaved blocks
struct RawTrack {
    first_block: usize,
    /// bytes occupied by the track counting both sides
    byte_len: usize,
    side: usize
}

impl RawTrack {
    fn side_len(&self) -> usize {
        self.byte_len / 2
    }
    /// copy this side's half-blocks out into a contiguous buffer
    fn extract(&self,data: &[u8]) -> Vec<u8> {
        let mut ans: Vec<u8> = Vec::with_capacity(self.side_len());
        let mut remaining = self.side_len();
        let mut block = 0;
        while remaining > 0 {
            let n = usize::min(remaining,HALF_BLOCK);
            let src = (self.first_block + block)*BLOCK_SIZE + self.side*HALF_BLOCK;
            ans.extend_from_slice(&data[src..src+n]);
            remaining -= n;
            block += 1;
        }
        ans
    }
    /// write a contiguous side buffer back into the interleaved blocks
    fn store(&self,data: &mut [u8],side_buf: &[u8]) {
        let mut remaining = usize::min(side_buf.len(),self.side_len());
        let mut block = 0;
        let mut mark = 0;
        while remaining > 0 {
            let n = usize::min(remaining,HALF_BLOCK);
            let dst = (self.first_block + block)*BLOCK_SIZE + self.side*HALF_BLOCK;
            data[dst..dst+n].copy_from_slice(&side_buf[mark..mark+n]);
            remaining -= n;
            mark += n;
            block += 1;
        }
    }
}

/// Decoded view of one side of one track, with WD279X record operations
pub struct Track {
    mfm: MfmStream
}

impl Track {
    pub fn new(raw: Vec<u8>) -> Self {
        Self {
            mfm: MfmStream::new(raw)
        }
    }
    /// Scan from the start of the track for the wanted ID record: three
    /// consecutive sync bytes, then the ID address mark, then the id.
    /// Returns the size code and leaves the stream after the ID CRC.
    fn find_sector(&mut self,track: u8,head: u8,sector: u8) -> Result<u8,DYNERR> {
        self.mfm.seek(0);
        let mut syncs = 0;
        loop {
            match self.mfm.read_byte() {
                Some((byte,sync)) => {
                    if sync {
                        syncs += 1;
                        continue;
                    }
                    if syncs >= 3 && byte == IDAM {
                        let mut id = [0u8;6];
                        for k in 0..6 {
                            match self.mfm.read_byte() {
                                Some((b,_)) => id[k] = b,
                                None => return Err(Box::new(img::Error::SectorNotFound))
                            }
                        }
                        if id[0]==track && id[1]==head && id[2]==sector {
                            return Ok(id[3]);
                        }
                    }
                    syncs = 0;
                },
                None => {
                    debug!("no ID record matched {}/{}/{}",head,track,sector);
                    return Err(Box::new(img::Error::SectorNotFound));
                }
            }
        }
    }
    /// advance to the data address mark following the current position
    fn find_data(&mut self) -> Result<(),DYNERR> {
        let mut syncs = 0;
        loop {
            match self.mfm.read_byte() {
                Some((byte,sync)) => {
                    if sync {
                        syncs += 1;
                        continue;
                    }
                    if syncs >= 3 && byte == DAM {
                        return Ok(());
                    }
                    syncs = 0;
                },
                None => {
                    error!("ID record was not followed by a data record");
                    return Err(Box::new(img::Error::EndOfTrack));
                }
            }
        }
    }
    pub fn read_sector(&mut self,track: u8,head: u8,sector: u8) -> Result<img::Sector,DYNERR> {
        let code = self.find_sector(track,head,sector)?;
        self.find_data()?;
        let size = img::size_from_code(code);
        let mut data: Vec<u8> = Vec::with_capacity(size);
        for _i in 0..size {
            match self.mfm.read_byte() {
                Some((b,_)) => data.push(b),
                None => return Err(Box::new(img::Error::EndOfTrack))
            }
        }
        let mut crc = [0u8;2];
        for k in 0..2 {
            match self.mfm.read_byte() {
                Some((b,_)) => crc[k] = b,
                None => return Err(Box::new(img::Error::EndOfTrack))
            }
        }
        Ok(img::Sector {
            id: img::SectorId { head: head as usize, track: track as usize, sector: sector as usize },
            data,
            crc: Some(u16::from_be_bytes(crc))
        })
    }
    /// overwrite the payload and CRC of an existing data record
    pub fn write_sector(&mut self,track: u8,head: u8,sector: u8,dat: &[u8]) -> STDRESULT {
        let code = self.find_sector(track,head,sector)?;
        self.find_data()?;
        let size = img::size_from_code(code);
        let padded = img::quantize(dat,size);
        let mut crc = Crc16::new();
        crc.add_slice(&[0xa1,0xa1,0xa1,DAM]);
        crc.add_slice(&padded);
        for byte in &padded {
            self.mfm.write_byte(*byte);
        }
        let [hi,lo] = u16::to_be_bytes(crc.value());
        self.mfm.write_byte(hi);
        self.mfm.write_byte(lo);
        Ok(())
    }
    /// Lay down a blank track: preamble, then for each sector id a gap,
    /// sync run, ID record, gap, sync run, and zeroed data record, then
    /// the postamble.  The stream length afterward is the track length.
    pub fn format(&mut self,track: u8,head: u8,sector_ids: &[u8],sector_size: usize) {
        let code = img::size_code(sector_size);
        self.mfm.seek(0);
        for _i in 0..8 {
            self.mfm.write_byte(GAP_BYTE);
        }
        for sector in sector_ids {
            for _i in 0..24 {
                self.mfm.write_byte(GAP_BYTE);
            }
            for _i in 0..12 {
                self.mfm.write_byte(0);
            }
            for _i in 0..3 {
                self.mfm.write_sync();
            }
            let mut crc = Crc16::new();
            crc.add_slice(&[0xa1,0xa1,0xa1,IDAM,track,head,*sector,code]);
            self.mfm.write_byte(IDAM);
            self.mfm.write_byte(track);
            self.mfm.write_byte(head);
            self.mfm.write_byte(*sector);
            self.mfm.write_byte(code);
            let [hi,lo] = u16::to_be_bytes(crc.value());
            self.mfm.write_byte(hi);
            self.mfm.write_byte(lo);
            for _i in 0..22 {
                self.mfm.write_byte(GAP_BYTE);
            }
            for _i in 0..12 {
                self.mfm.write_byte(0);
            }
            for _i in 0..3 {
                self.mfm.write_sync();
            }
            let mut crc = Crc16::new();
            crc.add_slice(&[0xa1,0xa1,0xa1,DAM]);
            self.mfm.write_byte(DAM);
            for _i in 0..sector_size {
                self.mfm.write_byte(0);
                crc.add(0);
            }
            let [hi,lo] = u16::to_be_bytes(crc.value());
            self.mfm.write_byte(hi);
            self.mfm.write_byte(lo);
        }
        for _i in 0..108 {
            self.mfm.write_byte(GAP_BYTE);
        }
    }
    /// every ID record on the track as (track,head,sector,size code)
    pub fn solve(&mut self) -> Vec<[u8;4]> {
        let mut ans: Vec<[u8;4]> = Vec::new();
        self.mfm.seek(0);
        let mut syncs = 0;
        loop {
            match self.mfm.read_byte() {
                Some((byte,sync)) => {
                    if sync {
                        syncs += 1;
                        continue;
                    }
                    if syncs >= 3 && byte == IDAM {
                        let mut id = [0u8;6];
                        let mut complete = true;
                        for k in 0..6 {
                            match self.mfm.read_byte() {
                                Some((b,_)) => id[k] = b,
                                None => complete = false
                            }
                        }
                        if complete {
                            ans.push([id[0],id[1],id[2],id[3]]);
                        }
                    }
                    syncs = 0;
                },
                None => return ans
            }
        }
    }
    fn is_dirty(&self) -> bool {
        self.mfm.is_dirty()
    }
    fn into_raw(self) -> Vec<u8> {
        self.mfm.into_inner()
    }
}

/// sector ids in the interleaved order they are laid on the track
pub fn interleaved_order(first: usize,count: usize,interleave: usize) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    for i in 0..interleave {
        let mut s = first + i;
        while s < first + count {
            ans.push(s as u8);
            s += interleave;
        }
    }
    ans
}

/// Wrapper for HFE data
pub struct Hfe {
    header: Header,
    /// per track, (first block, bytes occupied counting both sides)
    track_list: Vec<(u16,u16)>,
    sectors: usize,
    sector_size: usize,
    epoch: u64,
    data: Vec<u8>
}

impl Hfe {
    /// Create a formatted image.  Sector ids are interleaved with the
    /// default factor of 9, so physical order is not ascending.
    pub fn create(heads: usize,tracks: usize,sectors: usize,sector_size: usize) -> Result<Self,DYNERR> {
        img::check_geometry(heads,tracks,sectors,sector_size)?;
        if tracks > 128 {
            error!("track list would overflow its block");
            return Err(Box::new(img::Error::UnsupportedGeometry));
        }
        let order = interleaved_order(1,sectors,DEFAULT_INTERLEAVE);
        // format a prototype to learn the encoded side length
        let mut proto = Track::new(Vec::with_capacity(16*1024));
        proto.format(0,0,&order,sector_size);
        let side_len = proto.into_raw().len();
        let byte_len = 2*side_len;
        if byte_len > u16::MAX as usize {
            error!("encoded track length {} does not fit the track list",byte_len);
            return Err(Box::new(img::Error::UnsupportedGeometry));
        }
        let blocks_per_track = (side_len + HALF_BLOCK - 1) / HALF_BLOCK;
        let header = Header {
            revision: 0,
            tracks: tracks as u8,
            sides: heads as u8,
            encoding: ENCODING_ISOIBM_MFM,
            bit_rate: BIT_RATE,
            rpm: 0,
            mode: MODE_GENERIC_SHUGART_DD,
            dnu: 0,
            track_list_block: 1,
            write_allowed: 0xff,
            single_step: 0xff,
            t0s0_alt_encoding: 0xff,
            t0s0_encoding: 0xff,
            t0s1_alt_encoding: 0xff,
            t0s1_encoding: 0xff
        };
        let mut cur = Cursor::new(Vec::new());
        cur.write_le(&header)?;
        let mut data = cur.into_inner();
        data.resize(BLOCK_SIZE,0xff);
        // track list block
        let mut track_list: Vec<(u16,u16)> = Vec::new();
        let mut first_block = 2;
        for _t in 0..tracks {
            track_list.push((first_block as u16,byte_len as u16));
            data.append(&mut u16::to_le_bytes(first_block as u16).to_vec());
            data.append(&mut u16::to_le_bytes(byte_len as u16).to_vec());
            first_block += blocks_per_track;
        }
        data.resize(2*BLOCK_SIZE,0xff);
        // track data blocks
        for track in 0..tracks {
            let mut sides: Vec<Vec<u8>> = Vec::new();
            for head in 0..heads {
                let mut trk = Track::new(Vec::with_capacity(16*1024));
                trk.format(track as u8,head as u8,&order,sector_size);
                sides.push(trk.into_raw());
            }
            if heads==1 {
                sides.push(vec![0;side_len]);
            }
            for block in 0..blocks_per_track {
                for side in 0..2 {
                    let mark = block*HALF_BLOCK;
                    let end = usize::min(mark + HALF_BLOCK,side_len);
                    let mut half = sides[side][mark..end].to_vec();
                    half.resize(HALF_BLOCK,0);
                    data.append(&mut half);
                }
            }
        }
        Ok(Self {
            header,
            track_list,
            sectors,
            sector_size,
            epoch: 0,
            data
        })
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len() < 2*BLOCK_SIZE {
            debug!("file too short to be HFE");
            return Err(Box::new(img::Error::ImageFormat));
        }
        let mut cur = Cursor::new(buf);
        let header: Header = cur.read_le()?;
        if header.revision != 0 {
            error!("HFE revision {} is not handled",header.revision);
            return Err(Box::new(img::Error::ImageFormat));
        }
        if header.encoding != ENCODING_ISOIBM_MFM {
            error!("track encoding {} is not handled",header.encoding);
            return Err(Box::new(img::Error::ImageFormat));
        }
        if header.mode != MODE_GENERIC_SHUGART_DD {
            error!("interface mode {} is not handled",header.mode);
            return Err(Box::new(img::Error::ImageFormat));
        }
        if header.sides < 1 || header.sides > 2 {
            error!("side count {} is not handled",header.sides);
            return Err(Box::new(img::Error::UnsupportedGeometry));
        }
        let list_offset = header.track_list_block as usize * BLOCK_SIZE;
        if list_offset + 4*header.tracks as usize > buf.len() {
            debug!("track list runs off the end of the file");
            return Err(Box::new(img::Error::ImageFormat));
        }
        let mut track_list: Vec<(u16,u16)> = Vec::new();
        for t in 0..header.tracks as usize {
            let first = u16::from_le_bytes([buf[list_offset+4*t],buf[list_offset+4*t+1]]);
            let len = u16::from_le_bytes([buf[list_offset+4*t+2],buf[list_offset+4*t+3]]);
            let blocks = (len as usize/2 + HALF_BLOCK - 1) / HALF_BLOCK;
            if first as usize*BLOCK_SIZE + blocks*BLOCK_SIZE > buf.len() {
                debug!("track {} runs off the end of the file",t);
                return Err(Box::new(img::Error::ImageFormat));
            }
            track_list.push((first,len));
        }
        let mut ans = Self {
            header,
            track_list,
            sectors: 0,
            sector_size: 0,
            epoch: 0,
            data: buf.to_vec()
        };
        // discover the sector layout from track 0 side 0
        let mut trk = ans.open_track(0,0)?;
        let sol = trk.solve();
        if sol.is_empty() {
            debug!("no ID records on track 0");
            return Err(Box::new(img::Error::ImageFormat));
        }
        ans.sectors = sol.len();
        ans.sector_size = img::size_from_code(sol[0][3]);
        debug!("HFE geometry {} heads, {} tracks, {} sectors x {} bytes",
            ans.header.sides,ans.header.tracks,ans.sectors,ans.sector_size);
        Ok(ans)
    }
    pub fn header(&self) -> &Header {
        &self.header
    }
    fn raw_track(&self,track: usize,head: usize) -> Result<RawTrack,DYNERR> {
        if track >= self.track_list.len() || head >= self.header.sides as usize {
            return Err(Box::new(img::Error::SectorNotFound));
        }
        let (first,len) = self.track_list[track];
        Ok(RawTrack {
            first_block: first as usize,
            byte_len: len as usize,
            side: head
        })
    }
    fn open_track(&self,track: usize,head: usize) -> Result<Track,DYNERR> {
        let raw = self.raw_track(track,head)?;
        Ok(Track::new(raw.extract(&self.data)))
    }
}

impl DiskImage for Hfe {
    fn heads(&self) -> usize {
        self.header.sides as usize
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
        self.header.write_allowed != 0
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::HFE
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn write_epoch(&self) -> u64 {
        self.epoch
    }
    fn read_sector(&mut self,head: usize,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        trace!("reading {}/{}/{}",head,track,sector);
        let mut trk = self.open_track(track,head)?;
        let sec = trk.read_sector(track as u8,head as u8,sector as u8)?;
        Ok(sec.data)
    }
    fn write_sector(&mut self,head: usize,track: usize,sector: usize,dat: &[u8]) -> STDRESULT {
        trace!("writing {}/{}/{}",head,track,sector);
        if !self.is_writeable() {
            error!("HFE image is write protected");
            return Err(Box::new(img::Error::DiskNotWriteable));
        }
        let raw = self.raw_track(track,head)?;
        let mut trk = Track::new(raw.extract(&self.data));
        trk.write_sector(track as u8,head as u8,sector as u8,dat)?;
        if trk.is_dirty() {
            let side_buf = trk.into_raw();
            raw.store(&mut self.data,&side_buf);
        }
        self.epoch += 1;
        Ok(())
    }
    fn sector_exists(&mut self,head: usize,track: usize,sector: usize) -> bool {
        match self.open_track(track,head) {
            Ok(mut trk) => trk.find_sector(track as u8,head as u8,sector as u8).is_ok(),
            Err(_) => false
        }
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_covers_all_sectors() {
        let order = interleaved_order(1,18,DEFAULT_INTERLEAVE);
        assert_eq!(order.len(),18);
        assert_eq!(order[0..4],[1,10,2,11]);
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted,(1..=18).collect::<Vec<u8>>());
    }

    #[test]
    fn format_and_read_back() {
        let order = interleaved_order(1,18,DEFAULT_INTERLEAVE);
        let mut trk = Track::new(Vec::new());
        trk.format(5,0,&order,256);
        let sec = trk.read_sector(5,0,17).expect("sector not found");
        assert_eq!(sec.data,vec![0;256]);
        assert_eq!(sec.crc_ok(),Some(true));
    }

    #[test]
    fn track_write_read() {
        let order = interleaved_order(1,18,DEFAULT_INTERLEAVE);
        let mut trk = Track::new(Vec::new());
        trk.format(0,0,&order,256);
        trk.write_sector(0,0,3,&[0xde;256]).expect("write failed");
        let sec = trk.read_sector(0,0,3).expect("sector not found");
        assert_eq!(sec.data,vec![0xde;256]);
        assert_eq!(sec.crc_ok(),Some(true));
    }
}
