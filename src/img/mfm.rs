//! # MFM codec stream
//!
//! This wraps a raw track buffer and exposes the decoded byte stream that
//! the WD279X would deliver, together with sync awareness.  Every decoded
//! byte occupies two encoded bytes.  Encoded bytes store the MFM cells
//! LSB-first, which is the convention HFE uses for its track bits.
//!
//! The A1 sync byte is encoded with a suppressed clock transition,
//! producing the literal pair `22 91`.  A normally encoded A1 comes out
//! as `22 95`, and `91` appears nowhere in the nibble table, so no run of
//! ordinary data can imitate the sync mark.

/// The encoded form of A1 with the missing clock bit.
pub const SYNC_PAIR: [u8;2] = [0x22,0x91];

/// One encoded byte per (last output bit, nibble) pair.  The clock bit of
/// each cell is the NOR of the neighboring data bits; values are stored
/// bit-reversed so they can be emitted directly.
const ENCODE_TABLE: [u8;32] = [
    0x55, 0x95, 0x25, 0xA5, 0x49, 0x89, 0x29, 0xA9,
    0x52, 0x92, 0x22, 0xA2, 0x4A, 0x8A, 0x2A, 0xAA,
    0x54, 0x94, 0x24, 0xA4, 0x48, 0x88, 0x28, 0xA8,
    0x52, 0x92, 0x22, 0xA2, 0x4A, 0x8A, 0x2A, 0xAA
];

/// Decoded stream over an encoded track buffer.  Positions and lengths
/// on this stream are the underlying positions and lengths divided by 2.
pub struct MfmStream {
    raw: Vec<u8>,
    /// encoded byte position, always even at a decoded byte boundary
    pos: usize,
    /// last data bit that crossed the stream, primes the next clock bit
    last_bit: u8,
    dirty: bool
}

impl MfmStream {
    pub fn new(raw: Vec<u8>) -> Self {
        Self {
            raw,
            pos: 0,
            last_bit: 0,
            dirty: false
        }
    }
    /// Decoded length of the stream
    pub fn len(&self) -> usize {
        self.raw.len() / 2
    }
    /// Decoded position of the stream
    pub fn position(&self) -> usize {
        self.pos / 2
    }
    /// Seek to a decoded byte offset
    pub fn seek(&mut self,decoded: usize) {
        self.pos = decoded * 2;
    }
    /// Truncate the stream to a decoded length
    pub fn set_len(&mut self,decoded: usize) {
        self.raw.truncate(decoded * 2);
        if self.pos > self.raw.len() {
            self.pos = self.raw.len();
        }
        self.dirty = true;
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    /// Give back the encoded buffer
    pub fn into_inner(self) -> Vec<u8> {
        self.raw
    }
    /// Read the next decoded byte; the flag is set when the encoded pair
    /// was the sync mark.  `None` at end of stream.
    pub fn read_byte(&mut self) -> Option<(u8,bool)> {
        if self.pos + 2 > self.raw.len() {
            return None;
        }
        let pair = [self.raw[self.pos],self.raw[self.pos+1]];
        self.pos += 2;
        if pair == SYNC_PAIR {
            self.last_bit = 1;
            return Some((0xa1,true));
        }
        let cells = ((pair[0].reverse_bits() as u16) << 8) | pair[1].reverse_bits() as u16;
        let mut ans: u8 = 0;
        for i in 0..8 {
            ans = (ans << 1) | ((cells >> (14 - 2*i)) & 1) as u8;
        }
        self.last_bit = ans & 1;
        Some((ans,false))
    }
    /// Encode one byte at the current position, overwriting in place or
    /// growing the buffer at the end.
    pub fn write_byte(&mut self,byte: u8) {
        let hi = ENCODE_TABLE[((self.last_bit << 4) | (byte >> 4)) as usize];
        let lo = ENCODE_TABLE[((((byte >> 4) & 1) << 4) | (byte & 0x0f)) as usize];
        self.put(hi);
        self.put(lo);
        self.last_bit = byte & 1;
    }
    /// Emit the A1 sync mark with its suppressed clock bit
    pub fn write_sync(&mut self) {
        self.put(SYNC_PAIR[0]);
        self.put(SYNC_PAIR[1]);
        self.last_bit = 1;
    }
    fn put(&mut self,enc: u8) {
        if self.pos < self.raw.len() {
            self.raw[self.pos] = enc;
        } else {
            self.raw.push(enc);
        }
        self.pos += 1;
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_detection() {
        // gap bytes, two zeros, sync, zero
        let enc = vec![0x49,0x2a,0x49,0x2a,0x55,0x55,0x22,0x91,0x55,0x55];
        let mut stream = MfmStream::new(enc);
        let mut bytes: Vec<u8> = Vec::new();
        let mut flags: Vec<bool> = Vec::new();
        while let Some((byte,sync)) = stream.read_byte() {
            bytes.push(byte);
            flags.push(sync);
        }
        assert_eq!(bytes,vec![0x4e,0x4e,0x00,0xa1,0x00]);
        assert_eq!(flags,vec![false,false,false,true,false]);
    }

    #[test]
    fn round_trip() {
        let mut stream = MfmStream::new(Vec::new());
        let src: Vec<u8> = (0..=255).collect();
        for byte in &src {
            stream.write_byte(*byte);
        }
        assert_eq!(stream.len(),256);
        stream.seek(0);
        let mut ans: Vec<u8> = Vec::new();
        while let Some((byte,sync)) = stream.read_byte() {
            assert!(!sync);
            ans.push(byte);
        }
        assert_eq!(ans,src);
    }

    #[test]
    fn sync_round_trip() {
        let mut stream = MfmStream::new(Vec::new());
        stream.write_byte(0x4e);
        stream.write_sync();
        stream.write_byte(0xfe);
        stream.seek(0);
        assert_eq!(stream.read_byte(),Some((0x4e,false)));
        assert_eq!(stream.read_byte(),Some((0xa1,true)));
        assert_eq!(stream.read_byte(),Some((0xfe,false)));
        assert_eq!(stream.read_byte(),None);
    }

    #[test]
    fn ordinary_a1_is_not_sync() {
        let mut stream = MfmStream::new(Vec::new());
        stream.write_byte(0xa1);
        stream.seek(0);
        assert_eq!(stream.read_byte(),Some((0xa1,false)));
    }

    #[test]
    fn seek_maps_positions() {
        let mut stream = MfmStream::new(Vec::new());
        for byte in 0..16 {
            stream.write_byte(byte);
        }
        stream.seek(10);
        assert_eq!(stream.position(),10);
        assert_eq!(stream.read_byte(),Some((10,false)));
    }
}
