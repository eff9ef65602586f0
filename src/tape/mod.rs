//! # Cassette Tape Module
//!
//! A CAS image is the byte-for-byte content of a Dragon cassette: leader
//! bytes of 0x55 for bit-clock synchronization, then framed blocks.  A
//! block is `3C type length payload checksum 55`, the checksum being the
//! byte sum of type, length, and payload.
//!
//! The reader works at the bit level.  Real recordings can drop bits in
//! the leader, leaving the rest of the tape misaligned relative to byte
//! boundaries, so block synchronization slides bit-by-bit until the 0x3C
//! framing byte lines up.  That rescan is the only recovery this library
//! ever performs on its own.

use std::fmt;
use log::{trace,debug};
use crate::{STDRESULT,DYNERR};

pub const LEADER_BYTE: u8 = 0x55;
pub const SYNC_BYTE: u8 = 0x3c;
/// leader emitted before a block in the middle of a file
pub const SHORT_LEADER: usize = 1;
/// leader emitted at the start of a recording
pub const LONG_LEADER: usize = 128;
/// how many bits may pass after the leader before giving up on 0x3C
const SYNC_WINDOW_BITS: usize = 4096*8;

pub const BLOCK_TYPE_HEADER: u8 = 0x00;
pub const BLOCK_TYPE_DATA: u8 = 0x01;
pub const BLOCK_TYPE_EOF: u8 = 0xff;

const HEADER_PAYLOAD_LEN: usize = 15;

/// Enumerates tape errors.  The `Display` trait will print the
/// equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("ran off the end of the tape")]
    EndOfTape,
    #[error("invalid block type")]
    InvalidBlockType,
    #[error("invalid block checksum")]
    InvalidBlockChecksum,
    #[error("block payload cannot exceed 255 bytes")]
    BlockTooLarge,
    #[error("could not synchronize with a block")]
    SyncLost
}

/// file type byte carried in a header block
#[derive(PartialEq,Clone,Copy)]
pub enum FileType {
    Basic = 0,
    Data = 1,
    MachineCode = 2
}

/// Bit stream over a cassette image.  Bits travel MSB-first within each
/// byte.  A separate bit counter is kept so the stream can be misaligned
/// relative to byte boundaries.
pub struct CasTape {
    data: Vec<u8>,
    /// next bit to read, counted from the start of the tape
    pos: usize,
    /// bits accumulated by writes, flushed every 8
    write_acc: u8,
    write_count: usize
}

impl CasTape {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
            write_acc: 0,
            write_count: 0
        }
    }
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
            write_acc: 0,
            write_count: 0
        }
    }
    pub fn bit_position(&self) -> usize {
        self.pos
    }
    pub fn read_bit(&mut self) -> Result<u8,DYNERR> {
        if self.pos >= 8*self.data.len() {
            return Err(Box::new(Error::EndOfTape));
        }
        let byte = self.data[self.pos/8];
        let bit = (byte >> (7 - self.pos%8)) & 1;
        self.pos += 1;
        Ok(bit)
    }
    pub fn read_byte(&mut self) -> Result<u8,DYNERR> {
        let mut ans = 0;
        for _i in 0..8 {
            ans = (ans << 1) | self.read_bit()?;
        }
        Ok(ans)
    }
    pub fn write_bit(&mut self,bit: u8) {
        self.write_acc = (self.write_acc << 1) | (bit & 1);
        self.write_count += 1;
        if self.write_count==8 {
            self.data.push(self.write_acc);
            self.write_acc = 0;
            self.write_count = 0;
        }
    }
    pub fn write_byte(&mut self,byte: u8) {
        for i in 0..8 {
            self.write_bit((byte >> (7-i)) & 1);
        }
    }
    /// flatten the tape; a partial byte is padded out with zero bits
    pub fn to_bytes(&mut self) -> Vec<u8> {
        while self.write_count != 0 {
            self.write_bit(0);
        }
        self.data.clone()
    }
}

/// A framed tape block.  Validation is separate from construction so a
/// damaged block can still be inspected.
pub struct Block {
    pub block_type: u8,
    pub payload: Vec<u8>,
    pub checksum: u8
}

impl Block {
    pub fn new(block_type: u8,payload: Vec<u8>) -> Result<Self,DYNERR> {
        if payload.len() > 255 {
            return Err(Box::new(Error::BlockTooLarge));
        }
        let mut ans = Self {
            block_type,
            payload,
            checksum: 0
        };
        ans.checksum = ans.compute_checksum();
        Ok(ans)
    }
    pub fn new_data(payload: Vec<u8>) -> Result<Self,DYNERR> {
        Self::new(BLOCK_TYPE_DATA,payload)
    }
    pub fn new_eof() -> Self {
        Self {
            block_type: BLOCK_TYPE_EOF,
            payload: Vec::new(),
            checksum: BLOCK_TYPE_EOF
        }
    }
    pub fn new_header(header: &HeaderBlock) -> Self {
        let mut ans = Self {
            block_type: BLOCK_TYPE_HEADER,
            payload: header.encode().to_vec(),
            checksum: 0
        };
        ans.checksum = ans.compute_checksum();
        ans
    }
    pub fn compute_checksum(&self) -> u8 {
        let mut sum = self.block_type as usize + self.payload.len();
        for byte in &self.payload {
            sum += *byte as usize;
        }
        (sum % 256) as u8
    }
    /// verify the type and the stored checksum
    pub fn validate(&self) -> STDRESULT {
        match self.block_type {
            BLOCK_TYPE_HEADER | BLOCK_TYPE_DATA | BLOCK_TYPE_EOF => {},
            _ => return Err(Box::new(Error::InvalidBlockType))
        }
        if self.compute_checksum() != self.checksum {
            return Err(Box::new(Error::InvalidBlockChecksum));
        }
        Ok(())
    }
    pub fn is_eof(&self) -> bool {
        self.block_type==BLOCK_TYPE_EOF
    }
    /// decode the payload as a header block, when it is one
    pub fn header(&self) -> Option<HeaderBlock> {
        match self.block_type {
            BLOCK_TYPE_HEADER => HeaderBlock::decode(&self.payload),
            _ => None
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.block_type {
            BLOCK_TYPE_HEADER => "header".to_string(),
            BLOCK_TYPE_DATA => "data".to_string(),
            BLOCK_TYPE_EOF => "eof".to_string(),
            b => format!("type {}",b)
        };
        write!(f,"{} block, {} bytes",kind,self.payload.len())
    }
}

/// The 15-byte payload of a header block
pub struct HeaderBlock {
    pub filename: String,
    pub file_type: FileType,
    pub is_ascii: bool,
    pub is_gapped: bool,
    pub load_address: u16,
    pub start_address: u16
}

impl HeaderBlock {
    pub fn encode(&self) -> [u8;HEADER_PAYLOAD_LEN] {
        let mut ans = [0u8;HEADER_PAYLOAD_LEN];
        let upper = self.filename.to_uppercase();
        for i in 0..8 {
            ans[i] = match upper.as_bytes().get(i) {
                Some(byte) => *byte,
                None => 0x20
            };
        }
        ans[8] = self.file_type as u8;
        // flag semantics as the ROM wrote them: 00 means ASCII
        ans[9] = match self.is_ascii { true => 0x00, false => 0xff };
        ans[10] = match self.is_gapped { true => 0xff, false => 0x00 };
        ans[11..13].copy_from_slice(&u16::to_be_bytes(self.start_address));
        ans[13..15].copy_from_slice(&u16::to_be_bytes(self.load_address));
        ans
    }
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() != HEADER_PAYLOAD_LEN {
            debug!("header payload has {} bytes",dat.len());
            return None;
        }
        let file_type = match dat[8] {
            0 => FileType::Basic,
            1 => FileType::Data,
            2 => FileType::MachineCode,
            _ => return None
        };
        Some(Self {
            filename: String::from_utf8_lossy(&dat[0..8]).trim_end().to_string(),
            file_type,
            is_ascii: dat[9]==0x00,
            is_gapped: dat[10]==0xff,
            start_address: u16::from_be_bytes([dat[11],dat[12]]),
            load_address: u16::from_be_bytes([dat[13],dat[14]])
        })
    }
}

/// Read the next block off the tape.  First a leader of at least
/// `min_leader` bytes must pass (any bit alignment), then the stream
/// slides bit-by-bit until the framing byte appears; extra leader bytes
/// in between are consumed by the slide.  The block is returned without
/// validation.
pub fn read_block(tape: &mut CasTape,min_leader: usize) -> Result<Block,DYNERR> {
    // leader: a run of alternating bits
    let mut run = 0;
    let mut prev = 2;
    while run < 8*min_leader {
        let bit = tape.read_bit()?;
        match bit != prev {
            true => run += 1,
            false => run = 1
        }
        prev = bit;
    }
    // slide up to the framing byte
    let mut window: u8 = 0;
    let mut count = 0;
    while window != SYNC_BYTE {
        window = (window << 1) | tape.read_bit()?;
        count += 1;
        if count > SYNC_WINDOW_BITS {
            debug!("gave up looking for the framing byte");
            return Err(Box::new(Error::SyncLost));
        }
    }
    trace!("block framed at bit {}",tape.bit_position());
    let block_type = tape.read_byte()?;
    let length = tape.read_byte()? as usize;
    let mut payload: Vec<u8> = Vec::with_capacity(length);
    for _i in 0..length {
        payload.push(tape.read_byte()?);
    }
    let checksum = tape.read_byte()?;
    Ok(Block {
        block_type,
        payload,
        checksum
    })
}

/// Write a block with its leader and trailing leader byte
pub fn write_block(tape: &mut CasTape,block: &Block,leader: usize) {
    for _i in 0..leader {
        tape.write_byte(LEADER_BYTE);
    }
    tape.write_byte(SYNC_BYTE);
    tape.write_byte(block.block_type);
    tape.write_byte(block.payload.len() as u8);
    for byte in &block.payload {
        tape.write_byte(*byte);
    }
    tape.write_byte(block.checksum);
    tape.write_byte(LEADER_BYTE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_stream() {
        // reading after skipping 3 bits re-frames every byte
        let mut tape = CasTape::from_bytes(&[0x01,0x02,0x10,0x20,0xaa,0x55]);
        for _i in 0..3 {
            tape.read_bit().expect("end of tape");
        }
        let mut bytes: Vec<u8> = Vec::new();
        for _i in 0..5 {
            bytes.push(tape.read_byte().expect("end of tape"));
        }
        assert_eq!(bytes,vec![0x08,0x10,0x81,0x05,0x52]);
    }

    #[test]
    fn basic_header_block() {
        let header = HeaderBlock {
            filename: "FOOBAR".to_string(),
            file_type: FileType::Basic,
            is_ascii: false,
            is_gapped: false,
            load_address: 0,
            start_address: 0
        };
        let payload = header.encode();
        assert_eq!(payload,[0x46,0x4f,0x4f,0x42,0x41,0x52,0x20,0x20,0x00,0xff,0x00,0x00,0x00,0x00,0x00]);
        let block = Block::new_header(&header);
        assert_eq!(block.checksum,0x07);
        assert!(block.validate().is_ok());
    }

    #[test]
    fn machine_code_header_block() {
        let header = HeaderBlock {
            filename: "BARBAR".to_string(),
            file_type: FileType::MachineCode,
            is_ascii: true,
            is_gapped: false,
            load_address: 10000,
            start_address: 50000
        };
        let payload = header.encode();
        assert_eq!(payload,[0x42,0x41,0x52,0x42,0x41,0x52,0x20,0x20,0x02,0x00,0x00,0xc3,0x50,0x27,0x10]);
        let block = Block::new_header(&header);
        assert_eq!(block.checksum,0x45);
    }

    #[test]
    fn empty_data_block_checksum() {
        let block = Block::new_data(Vec::new()).expect("payload too long");
        assert_eq!(block.checksum,1);
        assert!(block.validate().is_ok());
    }

    #[test]
    fn block_round_trip() {
        let mut tape = CasTape::new();
        let header = HeaderBlock {
            filename: "TUNES".to_string(),
            file_type: FileType::Data,
            is_ascii: false,
            is_gapped: false,
            load_address: 0,
            start_address: 0
        };
        write_block(&mut tape,&Block::new_header(&header),LONG_LEADER);
        write_block(&mut tape,&Block::new_data(vec![1,2,3]).expect("too long"),SHORT_LEADER);
        write_block(&mut tape,&Block::new_eof(),SHORT_LEADER);
        let mut tape = CasTape::from_bytes(&tape.to_bytes());
        let first = read_block(&mut tape,2).expect("no block");
        assert!(first.validate().is_ok());
        let decoded = first.header().expect("not a header");
        assert_eq!(decoded.filename,"TUNES");
        let second = read_block(&mut tape,1).expect("no block");
        assert!(second.validate().is_ok());
        assert_eq!(second.payload,vec![1,2,3]);
        let third = read_block(&mut tape,1).expect("no block");
        assert!(third.is_eof());
        assert!(matches!(read_block(&mut tape,1).err()
            .and_then(|e| e.downcast_ref::<Error>().map(|t| matches!(t,Error::EndOfTape))),Some(true)));
    }

    #[test]
    fn misaligned_block_recovers() {
        let mut tape = CasTape::new();
        // three stray bits before the recording starts
        tape.write_bit(0);
        tape.write_bit(1);
        tape.write_bit(0);
        write_block(&mut tape,&Block::new_data(vec![0xaa,0xbb]).expect("too long"),8);
        write_block(&mut tape,&Block::new_eof(),SHORT_LEADER);
        let mut tape = CasTape::from_bytes(&tape.to_bytes());
        let block = read_block(&mut tape,4).expect("no block");
        assert!(block.validate().is_ok());
        assert_eq!(block.payload,vec![0xaa,0xbb]);
    }

    #[test]
    fn bad_checksum_is_reported() {
        let mut tape = CasTape::new();
        let mut block = Block::new_data(vec![1,2,3]).expect("too long");
        block.checksum = block.checksum.wrapping_add(1);
        write_block(&mut tape,&block,SHORT_LEADER);
        let mut tape = CasTape::from_bytes(&tape.to_bytes());
        let back = read_block(&mut tape,1).expect("no block");
        assert!(matches!(back.validate().err()
            .and_then(|e| e.downcast_ref::<Error>().map(|t| matches!(t,Error::InvalidBlockChecksum))),Some(true)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        assert!(Block::new_data(vec![0;256]).is_err());
    }
}
