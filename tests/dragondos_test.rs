// test of the dragondos file system module
use std::path::Path;
use dckit::img;
use dckit::fs;
use dckit::fs::DiskFS;

fn open_fixture() -> Box<dyn DiskFS> {
    let dat = std::fs::read(&Path::new("tests").join("dragondos-tunes.vdk")).expect("failed to read fixture");
    dckit::create_fs_from_bytestream(&dat,Some("vdk")).expect("could not mount fixture")
}

fn blank_disk(heads: usize,tracks: usize) -> fs::dragondos::Disk {
    let img = img::memory::Memory::create(heads,tracks,18,256).expect("bad geometry");
    fs::dragondos::Disk::initialize(Box::new(img)).expect("format failed")
}

#[test]
fn catalog_fixture() {
    let mut disk = open_fixture();
    assert_eq!(disk.what_am_i(),fs::FileSystemType::DragonDos);
    let names = disk.list_files().expect("listing failed");
    assert_eq!(names,vec!["DRYBONES.BIN","DANCER.BIN","TUNES.BAS"]);
    assert!(disk.file_exists("drybones.bin").expect("lookup failed"));
    assert!(!disk.file_exists("NOSUCH.BIN").expect("lookup failed"));
    disk.check().expect("fixture should be consistent");
}

#[test]
fn read_machine_code_file() {
    let mut disk = open_fixture();
    let file = disk.read_file("DRYBONES.BIN").expect("read failed");
    assert_eq!(file.kind,fs::FileKind::MachineCode);
    assert_eq!(file.load_address,Some(0x3000));
    assert_eq!(file.start_address,Some(0x3010));
    let expected: Vec<u8> = (0..1000).map(|i| ((i*3)&0xff) as u8).collect();
    assert_eq!(file.data,expected);
}

#[test]
fn read_basic_file() {
    let mut disk = open_fixture();
    let file = disk.read_file("TUNES.BAS").expect("read failed");
    assert_eq!(file.kind,fs::FileKind::Basic);
    assert_eq!(file.data.len(),100);
}

#[test]
fn file_info() {
    let mut disk = open_fixture();
    let info = disk.get_file_info("DANCER.BIN").expect("no info");
    assert_eq!(info.name,"DANCER.BIN");
    assert_eq!(info.kind,fs::FileKind::MachineCode);
    assert_eq!(info.size,309);
    assert_eq!(info.sectors,2);
    assert!(!info.protected);
}

#[test]
fn fixture_free_space() {
    let mut disk = open_fixture();
    // 720 sectors, 36 directory, 7 in files
    assert_eq!(disk.free().expect("free failed"),677*256);
}

#[test]
fn allocation_queries() {
    let mut disk = open_fixture();
    assert!(disk.is_sector_allocated(0,20,1).expect("query failed"));
    assert!(disk.is_sector_allocated(0,16,18).expect("query failed"));
    assert!(disk.is_sector_allocated(0,0,1).expect("query failed"));
    assert!(!disk.is_sector_allocated(0,30,5).expect("query failed"));
    assert!(disk.is_sector_allocated(0,50,1).is_err());
}

#[test]
fn lsn_mapping_is_a_bijection() {
    let disk = blank_disk(2,80);
    for head in 0..2 {
        for track in [0,16,20,79] {
            for sector in [1,9,18] {
                let lsn = disk.lsn(head,track,sector);
                assert_eq!(disk.lsn_to_hts(lsn).expect("bad lsn"),(head,track,sector));
            }
        }
    }
    assert_eq!(disk.lsn(0,0,1),0);
    assert_eq!(disk.lsn(1,0,1),18);
    assert_eq!(disk.lsn(0,1,1),36);
}

#[test]
fn case_sensitive_lookup_is_optional() {
    let dat = std::fs::read(&Path::new("tests").join("dragondos-tunes.vdk")).expect("failed to read fixture");
    let img = dckit::create_img_from_bytestream(&dat,Some("vdk")).expect("could not open");
    let mut disk = fs::dragondos::Disk::from_img(img).expect("could not mount");
    assert!(disk.find_main_entry("drybones.bin",false).expect("lookup failed").is_some());
    assert!(disk.find_main_entry("drybones.bin",true).expect("lookup failed").is_none());
    assert!(disk.find_main_entry("DRYBONES.BIN",true).expect("lookup failed").is_some());
}

#[test]
fn free_space_after_initialize() {
    let mut small = blank_disk(1,40);
    assert_eq!(small.free().expect("free failed"),175104);
    small.check().expect("fresh disk should be consistent");
    let mut large = blank_disk(2,80);
    assert_eq!(large.free().expect("free failed"),728064);
    large.check().expect("fresh disk should be consistent");
}

#[test]
fn delete_semantics() {
    let mut disk = open_fixture();
    let free0 = disk.free().expect("free failed");
    disk.delete_file("DRYBONES.BIN").expect("delete failed");
    assert!(!disk.file_exists("DRYBONES.BIN").expect("lookup failed"));
    // 4 sectors come back
    assert_eq!(disk.free().expect("free failed"),free0 + 4*256);
    disk.check().expect("delete left the disk inconsistent");
}

#[test]
fn rename_to_existing_fails_without_mutation() {
    let mut disk = open_fixture();
    let before = disk.get_img().to_bytes();
    let err = disk.rename_file("DRYBONES.BIN","DANCER.BIN").expect_err("rename should fail");
    assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::FileExists)));
    assert_eq!(disk.get_img().to_bytes(),before);
}

#[test]
fn rename_file() {
    let mut disk = open_fixture();
    disk.rename_file("DRYBONES.BIN","SKELETON.BIN").expect("rename failed");
    assert!(!disk.file_exists("DRYBONES.BIN").expect("lookup failed"));
    let file = disk.read_file("SKELETON.BIN").expect("read failed");
    assert_eq!(file.data.len(),1000);
    disk.check().expect("rename left the disk inconsistent");
}

#[test]
fn write_read_round_trip() {
    let mut disk = blank_disk(1,40);
    let free0 = disk.free().expect("free failed");
    let data: Vec<u8> = (0..700).map(|i| (i%251) as u8).collect();
    let file = fs::File::new_machine_code("SONG.BIN",data.clone(),0x0e00,0x0e02);
    disk.write_file("SONG.BIN",&file).expect("write failed");
    assert!(disk.file_exists("SONG.BIN").expect("lookup failed"));
    let back = disk.read_file("song.bin").expect("read failed");
    assert_eq!(back.kind,fs::FileKind::MachineCode);
    assert_eq!(back.load_address,Some(0x0e00));
    assert_eq!(back.start_address,Some(0x0e02));
    assert_eq!(back.data,data);
    // 709 raw bytes means 3 sectors
    assert_eq!(disk.free().expect("free failed"),free0 - 3*256);
    disk.check().expect("write left the disk inconsistent");
    disk.delete_file("SONG.BIN").expect("delete failed");
    assert_eq!(disk.free().expect("free failed"),free0);
    disk.check().expect("delete left the disk inconsistent");
}

#[test]
fn write_rejects_duplicates_and_bad_names() {
    let mut disk = blank_disk(1,40);
    let file = fs::File::new_data("A1",vec![1,2,3]);
    disk.write_file("A1",&file).expect("write failed");
    let err = disk.write_file("A1",&file).expect_err("duplicate should fail");
    assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::FileExists)));
    for bad in ["",".BIN","TOOLONGNAME.BIN","HAS SPACE","FILE.LONG","-DASH"] {
        let err = disk.write_file(bad,&file).expect_err("bad name should fail");
        assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::InvalidFilename)),"{} was accepted",bad);
    }
}

#[test]
fn empty_file_round_trip() {
    let mut disk = blank_disk(1,40);
    let file = fs::File::new_data("EMPTY.DAT",Vec::new());
    disk.write_file("EMPTY.DAT",&file).expect("write failed");
    let back = disk.read_file("EMPTY.DAT").expect("read failed");
    assert_eq!(back.data.len(),0);
    let info = disk.get_file_info("EMPTY.DAT").expect("no info");
    assert_eq!(info.size,0);
    disk.check().expect("empty file left the disk inconsistent");
}

#[test]
fn fragmented_write_uses_extension_entries() {
    let mut disk = blank_disk(1,40);
    // consume all but 20 sectors
    let filler: Vec<u8> = vec![0x11;664*256];
    disk.write_file("FILLER.DAT",&fs::File::new_data("FILLER.DAT",filler)).expect("filler write failed");
    assert_eq!(disk.free().expect("free failed"),20*256);
    // carve the remainder into 2-sector files
    for i in 0..10 {
        let name = format!("T{}.DAT",i);
        disk.write_file(&name,&fs::File::new_data(&name,vec![i as u8;512])).expect("small write failed");
    }
    assert_eq!(disk.free().expect("free failed"),0);
    // free five holes of two sectors each
    for i in [0,2,4,6,8] {
        disk.delete_file(&format!("T{}.DAT",i)).expect("delete failed");
    }
    assert_eq!(disk.free().expect("free failed"),10*256);
    // no contiguous run can hold this, so the chain must fragment
    let data: Vec<u8> = (0..10*256).map(|i| (i%241) as u8).collect();
    disk.write_file("FRAG.DAT",&fs::File::new_data("FRAG.DAT",data.clone())).expect("fragmented write failed");
    let back = disk.read_file("FRAG.DAT").expect("read failed");
    assert_eq!(back.data,data);
    let info = disk.get_file_info("FRAG.DAT").expect("no info");
    assert_eq!(info.sectors,10);
    disk.check().expect("fragmented write left the disk inconsistent");
}

#[test]
fn mirror_mismatch_fails_check() {
    let mut disk = open_fixture();
    let mut sec = disk.get_img().read_sector(0,16,5).expect("read failed");
    sec[100] ^= 0xff;
    disk.get_img().write_sector(0,16,5,&sec).expect("write failed");
    assert!(disk.check().is_err());
}

#[test]
fn directory_cache_tracks_outside_writes() {
    let mut disk = open_fixture();
    assert!(disk.file_exists("DRYBONES.BIN").expect("lookup failed"));
    // invalidate entry 0 by writing the directory track directly
    for track in [20,16] {
        let mut sec = disk.get_img().read_sector(0,track,3).expect("read failed");
        sec[0] = 0x88;
        disk.get_img().write_sector(0,track,3,&sec).expect("write failed");
    }
    // the cached directory must notice the epoch change
    assert!(!disk.file_exists("DRYBONES.BIN").expect("lookup failed"));
    disk.check().expect("disk should still be consistent");
}
