// test of the rsdos file system module
use std::path::Path;
use dckit::fs;
use dckit::fs::DiskFS;

fn open_fixture() -> Box<dyn DiskFS> {
    let path = Path::new("tests").join("rsdos-tunes.dsk");
    dckit::create_fs_from_file(&path.to_string_lossy()).expect("could not mount fixture")
}

#[test]
fn identifies_rsdos() {
    let disk = open_fixture();
    assert_eq!(disk.what_am_i(),fs::FileSystemType::RsDos);
}

#[test]
fn catalog_fixture() {
    let mut disk = open_fixture();
    let names = disk.list_files().expect("listing failed");
    assert_eq!(names,vec!["HELLO.BAS","DATA.DAT"]);
    assert!(disk.file_exists("hello.bas").expect("lookup failed"));
    disk.check().expect("fixture should be consistent");
}

#[test]
fn read_files() {
    let mut disk = open_fixture();
    let hello = disk.read_file("HELLO.BAS").expect("read failed");
    assert_eq!(hello.kind,fs::FileKind::Basic);
    assert_eq!(hello.data.len(),376);
    assert_eq!(hello.data[0],1);
    assert_eq!(hello.data[256],0);
    let dat = disk.read_file("DATA.DAT").expect("read failed");
    assert_eq!(dat.kind,fs::FileKind::Data);
    assert_eq!(dat.data.len(),256);
    assert_eq!(dat.data[0],9);
}

#[test]
fn file_info_and_free() {
    let mut disk = open_fixture();
    let info = disk.get_file_info("HELLO.BAS").expect("no info");
    assert_eq!(info.size,376);
    assert_eq!(info.sectors,2);
    // 66 of 68 granules are free
    assert_eq!(disk.free().expect("free failed"),66*9*256);
}

#[test]
fn allocation_queries() {
    let mut disk = open_fixture();
    assert!(disk.is_sector_allocated(0,17,1).expect("query failed"));
    assert!(disk.is_sector_allocated(0,0,1).expect("query failed"));
    assert!(!disk.is_sector_allocated(0,0,10).expect("query failed"));
    assert!(!disk.is_sector_allocated(0,30,1).expect("query failed"));
}

#[test]
fn writes_are_refused() {
    let mut disk = open_fixture();
    let file = fs::File::new_data("NEW.DAT",vec![1]);
    assert!(disk.write_file("NEW.DAT",&file).is_err());
    assert!(disk.delete_file("HELLO.BAS").is_err());
    assert!(disk.rename_file("HELLO.BAS","OTHER.BAS").is_err());
}
