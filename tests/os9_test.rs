// test of the os9 file system module
use std::path::Path;
use dckit::fs;
use dckit::fs::DiskFS;
use dckit::fs::os9::modules;

/// an 80 byte program module named List
const LIST_MODULE: [u8;80] = [
    0x87,0xCD,0x00,0x50,0x00,0x0D,0x11,0x81,0x78,0x00,0x12,0x00,0xC8,0x4C,0x69,0x73,
    0xF4,0xBB,0xC6,0xD1,0xDC,0xE7,0xF2,0xFD,0x08,0x13,0x1E,0x29,0x34,0x3F,0x4A,0x55,
    0x60,0x6B,0x76,0x81,0x8C,0x97,0xA2,0xAD,0xB8,0xC3,0xCE,0xD9,0xE4,0xEF,0xFA,0x05,
    0x10,0x1B,0x26,0x31,0x3C,0x47,0x52,0x5D,0x68,0x73,0x7E,0x89,0x94,0x9F,0xAA,0xB5,
    0xC0,0xCB,0xD6,0xE1,0xEC,0xF7,0x02,0x0D,0x18,0x23,0x2E,0x39,0x44,0xB3,0x5D,0x5C
];

fn open_fixture() -> fs::os9::Disk {
    let path = Path::new("tests").join("os9-tunes.dsk");
    let img = dckit::create_img_from_file(&path.to_string_lossy()).expect("could not open fixture");
    fs::os9::Disk::from_img(img).expect("could not mount fixture")
}

#[test]
fn module_parsing() {
    let module = modules::Module::from_bytes(&LIST_MODULE).expect("parse failed");
    assert_eq!(module.name,"List");
    assert_eq!(module.kind(),Some(modules::ModuleKind::Program));
    assert_eq!(module.language,1);
    assert_eq!(module.attributes,8);
    assert_eq!(module.revision,1);
    assert_eq!(module.size,80);
    assert_eq!(module.header_parity,0x78);
    assert_eq!(module.exec_offset,Some(0x12));
    assert_eq!(module.storage_size,Some(0xc8));
    assert_eq!(module.crc,0xb35d5c);
    assert!(module.crc_ok());
}

#[test]
fn module_rejects_bad_parity() {
    let mut blob = LIST_MODULE;
    blob[8] ^= 0x01;
    assert!(modules::Module::from_bytes(&blob).is_err());
}

#[test]
fn module_crc_notices_damage() {
    let mut blob = LIST_MODULE;
    blob[40] ^= 0x10;
    let module = modules::Module::from_bytes(&blob).expect("parse failed");
    assert!(!module.crc_ok());
}

#[test]
fn catalog_fixture() {
    let mut disk = open_fixture();
    assert_eq!(disk.volume_name(),"TUNES");
    let root = disk.list_files().expect("listing failed");
    assert_eq!(root,vec!["CMDS","README"]);
    let cmds = disk.list_files_in("CMDS").expect("listing failed");
    assert_eq!(cmds,vec!["LIST"]);
    disk.check().expect("fixture should be consistent");
}

#[test]
fn read_module_from_directory() {
    let mut disk = open_fixture();
    let module = disk.read_module("CMDS/LIST").expect("module read failed");
    assert_eq!(module.name,"List");
    assert!(module.crc_ok());
    let file = disk.read_file("CMDS/LIST").expect("read failed");
    assert_eq!(file.kind,fs::FileKind::Module);
    assert_eq!(file.data.len(),80);
}

#[test]
fn read_data_file() {
    let mut disk = open_fixture();
    let file = disk.read_file("README").expect("read failed");
    assert_eq!(file.kind,fs::FileKind::Data);
    let expected: Vec<u8> = (0..200).map(|i| ((i*13+5)&0xff) as u8).collect();
    assert_eq!(file.data,expected);
}

#[test]
fn free_space() {
    let mut disk = open_fixture();
    // 630 sectors, 10 allocated
    assert_eq!(disk.free().expect("free failed"),620*256);
}

#[test]
fn create_and_delete_directory() {
    let mut disk = open_fixture();
    disk.create_directory("SPARE").expect("mkdir failed");
    let root = disk.list_files().expect("listing failed");
    assert!(root.contains(&"SPARE".to_string()));
    disk.check().expect("mkdir left the disk inconsistent");
    let sub = disk.list_files_in("SPARE").expect("listing failed");
    assert!(sub.is_empty());
    disk.delete_directory("SPARE").expect("rmdir failed");
    let root = disk.list_files().expect("listing failed");
    assert!(!root.contains(&"SPARE".to_string()));
    disk.check().expect("rmdir left the disk inconsistent");
    assert_eq!(disk.free().expect("free failed"),620*256);
}

#[test]
fn delete_refuses_populated_directory() {
    let mut disk = open_fixture();
    assert!(disk.delete_directory("CMDS").is_err());
    assert!(disk.list_files_in("CMDS").expect("listing failed").contains(&"LIST".to_string()));
}

#[test]
fn missing_path() {
    let mut disk = open_fixture();
    assert!(!disk.file_exists("CMDS/NOSUCH").expect("lookup failed"));
    assert!(disk.read_file("NOSUCH").is_err());
}
