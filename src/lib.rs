//! # `dckit` main library
//!
//! This library manipulates disk and cassette images suitable for the
//! Dragon and Tandy Color Computer family of machines.  Manipulations can
//! be done at a level as low as MFM track bytes, or as high as files.
//!
//! ## Architecture
//!
//! Disk operations are built around two trait objects:
//! * `img::DiskImage` encodes/decodes the image format, exposing the
//!   disk as an addressable sector store, and does not try to interpret
//!   a file system
//! * `fs::DiskFS` imposes a file system on the decoded sectors
//!
//! When a `DiskFS` object is created it takes ownership of some
//! `DiskImage`, which it then uses as storage.  Changes are not
//! permanent until the image is flattened with `to_bytes` and handed
//! back to whatever is hosting it; `save_img` does this for ordinary
//! files.
//!
//! ## Disk Images
//!
//! * JVC (usually `.dsk`), a header-prefixed sector dump
//! * VDK, the PC-Dragon flat format
//! * HFE, MFM-encoded tracks in 512-byte blocks
//! * DMK, decoded track bytes with an IDAM pointer table
//!
//! ## File Systems
//!
//! * DragonDos, with the full read-write treatment
//! * RSDOS, FLEX, and OS-9, read-oriented
//!
//! ## Cassettes
//!
//! The `tape` module reads and writes CAS images at the bit level,
//! including resynchronization against dropped leader bits.

pub mod img;
pub mod fs;
pub mod tape;
pub mod commands;

use std::io::Read;
use std::str::FromStr;
use log::info;
use img::DiskImage;
use fs::DiskFS;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const KNOWN_FILE_EXTENSIONS: &str = "dsk,jvc,vdk,hfe,dmk";

/// Save the image file (make changes permanent)
pub fn save_img(disk: &mut Box<dyn DiskImage>,img_path: &str) -> STDRESULT {
    std::fs::write(img_path,disk.to_bytes())?;
    Ok(())
}

/// Given a bytestream return a disk image, or Err if the bytestream
/// cannot be interpreted.  Optional `maybe_ext` restricts the image
/// types that will be tried based on file extension.
pub fn create_img_from_bytestream(disk_img_data: &[u8],maybe_ext: Option<&str>) -> Result<Box<dyn DiskImage>,DYNERR> {
    let ext = maybe_ext.map(|s| s.to_lowercase());
    if ext.is_none() || ext==Some("vdk".to_string()) {
        if let Ok(img) = img::vdk::Vdk::from_bytes(disk_img_data) {
            info!("identified VDK image");
            return Ok(Box::new(img));
        }
    }
    if ext.is_none() || ext==Some("hfe".to_string()) {
        if let Ok(img) = img::hfe::Hfe::from_bytes(disk_img_data) {
            info!("identified HFE image");
            return Ok(Box::new(img));
        }
    }
    if ext.is_none() || ext==Some("dmk".to_string()) {
        if let Ok(img) = img::dmk::Dmk::from_bytes(disk_img_data) {
            info!("identified DMK image");
            return Ok(Box::new(img));
        }
    }
    // JVC accepts nearly any payload that divides evenly, so it goes last
    if ext.is_none() || ext==Some("dsk".to_string()) || ext==Some("jvc".to_string()) {
        if let Ok(img) = img::jvc::Jvc::from_bytes(disk_img_data) {
            info!("identified JVC image");
            return Ok(Box::new(img));
        }
    }
    info!("could not interpret the image; known extensions are {}",KNOWN_FILE_EXTENSIONS);
    Err(Box::new(img::Error::UnknownImageType))
}

/// Calls `create_img_from_bytestream` with the extension taken from the path
pub fn create_img_from_file(img_path: &str) -> Result<Box<dyn DiskImage>,DYNERR> {
    let dat = std::fs::read(img_path)?;
    create_img_from_bytestream(&dat,file_extension(img_path).as_deref())
}

/// Create a blank image of the given type.  HFE images come formatted at
/// the track level; flat images come zeroed.
pub fn create_img(img_type: img::DiskImageType,heads: usize,tracks: usize,sectors: usize,sector_size: usize) -> Result<Box<dyn DiskImage>,DYNERR> {
    match img_type {
        img::DiskImageType::JVC => Ok(Box::new(img::jvc::Jvc::create(heads,tracks,sectors,sector_size)?)),
        img::DiskImageType::VDK => {
            if sectors != img::vdk::SECTORS || sector_size != img::vdk::SECTOR_SIZE {
                return Err(Box::new(img::Error::UnsupportedGeometry));
            }
            Ok(Box::new(img::vdk::Vdk::create(heads,tracks)?))
        },
        img::DiskImageType::HFE => Ok(Box::new(img::hfe::Hfe::create(heads,tracks,sectors,sector_size)?)),
        img::DiskImageType::DMK => Ok(Box::new(img::dmk::Dmk::create(heads,tracks,sectors,sector_size)?)),
        img::DiskImageType::MEM => Ok(Box::new(img::memory::Memory::create(heads,tracks,sectors,sector_size)?))
    }
}

/// Mount a file system of an explicitly identified type on an image.
/// The file system takes ownership of the image.
pub fn create_fs(fs_type: fs::FileSystemType,img: Box<dyn DiskImage>) -> Result<Box<dyn DiskFS>,DYNERR> {
    match fs_type {
        fs::FileSystemType::DragonDos => Ok(Box::new(fs::dragondos::Disk::from_img(img)?)),
        fs::FileSystemType::RsDos => Ok(Box::new(fs::rsdos::Disk::from_img(img)?)),
        fs::FileSystemType::Flex => Ok(Box::new(fs::flex::Disk::from_img(img)?)),
        fs::FileSystemType::Os9 => Ok(Box::new(fs::os9::Disk::from_img(img)?))
    }
}

/// Return the file system on a disk image, or None if one cannot be
/// identified.  If found, the file system takes ownership of the image.
fn try_img(mut img: Box<dyn DiskImage>) -> Option<Box<dyn DiskFS>> {
    if fs::dragondos::Disk::test_img(&mut img) {
        info!("identified DragonDos file system");
        if let Ok(disk) = fs::dragondos::Disk::from_img(img) {
            return Some(Box::new(disk));
        }
        return None;
    }
    if fs::os9::Disk::test_img(&mut img) {
        info!("identified OS-9 file system");
        if let Ok(disk) = fs::os9::Disk::from_img(img) {
            return Some(Box::new(disk));
        }
        return None;
    }
    if fs::rsdos::Disk::test_img(&mut img) {
        info!("identified RSDOS file system");
        if let Ok(disk) = fs::rsdos::Disk::from_img(img) {
            return Some(Box::new(disk));
        }
        return None;
    }
    if fs::flex::Disk::test_img(&mut img) {
        info!("identified FLEX file system");
        if let Ok(disk) = fs::flex::Disk::from_img(img) {
            return Some(Box::new(disk));
        }
        return None;
    }
    None
}

/// Given a bytestream return a DiskFS, or Err if the bytestream cannot
/// be interpreted.  Optional `maybe_ext` restricts the image types that
/// will be tried based on file extension.
pub fn create_fs_from_bytestream(disk_img_data: &[u8],maybe_ext: Option<&str>) -> Result<Box<dyn DiskFS>,DYNERR> {
    let img = create_img_from_bytestream(disk_img_data,maybe_ext)?;
    match try_img(img) {
        Some(disk) => Ok(disk),
        None => Err(Box::new(fs::Error::FileSystemMismatch))
    }
}

/// Calls `create_fs_from_bytestream` with the extension taken from the path
pub fn create_fs_from_file(img_path: &str) -> Result<Box<dyn DiskFS>,DYNERR> {
    let dat = std::fs::read(img_path)?;
    create_fs_from_bytestream(&dat,file_extension(img_path).as_deref())
}

/// Calls `create_fs_from_bytestream` on the standard input stream
pub fn create_fs_from_stdin() -> Result<Box<dyn DiskFS>,DYNERR> {
    let mut dat: Vec<u8> = Vec::new();
    std::io::stdin().read_to_end(&mut dat)?;
    create_fs_from_bytestream(&dat,None)
}

/// The image type named by a path's extension, if the extension names one
pub fn img_type_from_path(img_path: &str) -> Result<img::DiskImageType,DYNERR> {
    match file_extension(img_path) {
        Some(ext) => Ok(img::DiskImageType::from_str(&ext)?),
        None => Err(Box::new(img::Error::UnknownImageType))
    }
}

fn file_extension(path: &str) -> Option<String> {
    std::path::Path::new(path).extension()
        .and_then(|os| os.to_str())
        .map(|s| s.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_selects_backend() {
        assert!(matches!(img_type_from_path("games/tunes.VDK"),Ok(img::DiskImageType::VDK)));
        assert!(matches!(img_type_from_path("tunes.dsk"),Ok(img::DiskImageType::JVC)));
        assert!(matches!(img_type_from_path("tunes.hfe"),Ok(img::DiskImageType::HFE)));
        assert!(matches!(img_type_from_path("tunes.dmk"),Ok(img::DiskImageType::DMK)));
        assert!(img_type_from_path("tunes.cas").is_err());
        assert!(img_type_from_path("tunes").is_err());
    }
}
