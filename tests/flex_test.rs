// test of the flex file system module
use std::path::Path;
use dckit::fs;
use dckit::fs::DiskFS;

fn open_fixture() -> Box<dyn DiskFS> {
    let path = Path::new("tests").join("flex-tunes.dsk");
    dckit::create_fs_from_file(&path.to_string_lossy()).expect("could not mount fixture")
}

#[test]
fn identifies_flex() {
    let disk = open_fixture();
    assert_eq!(disk.what_am_i(),fs::FileSystemType::Flex);
}

#[test]
fn catalog_fixture() {
    let mut disk = open_fixture();
    let names = disk.list_files().expect("listing failed");
    assert_eq!(names,vec!["README.TXT"]);
    assert!(disk.file_exists("readme.txt").expect("lookup failed"));
    assert!(!disk.file_exists("NOSUCH.TXT").expect("lookup failed"));
    disk.check().expect("fixture should be consistent");
}

#[test]
fn read_linked_sectors() {
    let mut disk = open_fixture();
    let file = disk.read_file("README.TXT").expect("read failed");
    assert_eq!(file.kind,fs::FileKind::Text);
    // two sectors of 252 data bytes
    assert_eq!(file.data.len(),504);
    assert_eq!(file.data[0],1);
    assert_eq!(file.data[252],2);
}

#[test]
fn free_space() {
    let mut disk = open_fixture();
    assert_eq!(disk.free().expect("free failed"),600*252);
}

#[test]
fn file_info() {
    let mut disk = open_fixture();
    let info = disk.get_file_info("README.TXT").expect("no info");
    assert_eq!(info.sectors,2);
    assert_eq!(info.size,504);
}

#[test]
fn writes_are_refused() {
    let mut disk = open_fixture();
    let file = fs::File::new_data("NEW.TXT",vec![1]);
    assert!(disk.write_file("NEW.TXT",&file).is_err());
    assert!(disk.delete_file("README.TXT").is_err());
}
