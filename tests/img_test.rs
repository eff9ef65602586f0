// test of the disk image backends and factories
use std::path::Path;
use dckit::img;
use dckit::img::DiskImage;

#[test]
fn jvc_create_reopen() {
    let mut disk = img::jvc::Jvc::create(2,40,18,256).expect("bad geometry");
    disk.write_sector(1,20,9,&[0x5a;256]).expect("write failed");
    let flat = disk.to_bytes();
    let mut disk = dckit::create_img_from_bytestream(&flat,Some("dsk")).expect("could not reopen");
    assert_eq!(disk.what_am_i(),img::DiskImageType::JVC);
    assert_eq!((disk.heads(),disk.tracks(),disk.sectors(),disk.sector_size()),(2,40,18,256));
    assert_eq!(disk.read_sector(1,20,9).expect("read failed"),vec![0x5a;256]);
}

#[test]
fn vdk_create_reopen() {
    let mut disk = img::vdk::Vdk::create(1,80).expect("bad geometry");
    disk.write_sector(0,79,1,&[1;256]).expect("write failed");
    let flat = disk.to_bytes();
    let mut disk = dckit::create_img_from_bytestream(&flat,None).expect("could not reopen");
    assert_eq!(disk.what_am_i(),img::DiskImageType::VDK);
    assert_eq!((disk.heads(),disk.tracks(),disk.sectors(),disk.sector_size()),(1,80,18,256));
    assert_eq!(disk.read_sector(0,79,1).expect("read failed"),vec![1;256]);
}

#[test]
fn hfe_create_reopen() {
    let mut disk = img::hfe::Hfe::create(1,40,18,256).expect("bad geometry");
    let flat = disk.to_bytes();
    let opened = img::hfe::Hfe::from_bytes(&flat).expect("could not reopen");
    let header = opened.header();
    assert_eq!(header.revision,0);
    assert_eq!(header.tracks,40);
    assert_eq!(header.sides,1);
    assert_eq!(header.encoding,img::hfe::ENCODING_ISOIBM_MFM);
    assert_eq!(header.mode,img::hfe::MODE_GENERIC_SHUGART_DD);
    let mut disk: Box<dyn DiskImage> = Box::new(opened);
    assert_eq!((disk.heads(),disk.tracks(),disk.sectors(),disk.sector_size()),(1,40,18,256));
    for sector in 1..=18 {
        assert!(disk.sector_exists(0,0,sector),"sector {} missing on track 0",sector);
        assert!(disk.sector_exists(0,39,sector),"sector {} missing on track 39",sector);
    }
    assert!(!disk.sector_exists(0,40,1));
    assert!(!disk.sector_exists(1,0,1));
    assert!(!disk.sector_exists(0,0,19));
}

#[test]
fn hfe_write_survives_reopen() {
    let mut disk = img::hfe::Hfe::create(2,40,18,256).expect("bad geometry");
    disk.write_sector(1,17,4,&[0xc3;256]).expect("write failed");
    let flat = disk.to_bytes();
    let mut disk = dckit::create_img_from_bytestream(&flat,Some("hfe")).expect("could not reopen");
    assert_eq!(disk.what_am_i(),img::DiskImageType::HFE);
    assert_eq!(disk.read_sector(1,17,4).expect("read failed"),vec![0xc3;256]);
    // the write must not disturb the neighbors
    assert_eq!(disk.read_sector(1,17,3).expect("read failed"),vec![0;256]);
    assert_eq!(disk.read_sector(1,17,5).expect("read failed"),vec![0;256]);
}

#[test]
fn hfe_rejects_foreign_variants() {
    let mut disk = img::hfe::Hfe::create(1,40,18,256).expect("bad geometry");
    let flat = disk.to_bytes();
    // interface mode
    let mut bad = flat.clone();
    bad[16] = 0x00;
    assert!(img::hfe::Hfe::from_bytes(&bad).is_err());
    // track encoding
    let mut bad = flat.clone();
    bad[11] = 0x02;
    assert!(img::hfe::Hfe::from_bytes(&bad).is_err());
    // revision
    let mut bad = flat.clone();
    bad[8] = 1;
    assert!(img::hfe::Hfe::from_bytes(&bad).is_err());
}

#[test]
fn write_truncates_and_pads() {
    for img_type in [img::DiskImageType::JVC,img::DiskImageType::HFE,img::DiskImageType::MEM] {
        let mut disk = dckit::create_img(img_type,1,40,18,256).expect("bad geometry");
        disk.write_sector(0,3,7,&[9,9,9]).expect("write failed");
        let back = disk.read_sector(0,3,7).expect("read failed");
        assert_eq!(back.len(),256);
        assert_eq!(&back[0..4],&[9,9,9,0]);
        disk.write_sector(0,3,8,&vec![4;300]).expect("write failed");
        let back = disk.read_sector(0,3,8).expect("read failed");
        assert_eq!(back.len(),256);
        assert_eq!(back[255],4);
    }
}

#[test]
fn write_epoch_counts_writes() {
    let mut disk = dckit::create_img(img::DiskImageType::MEM,1,40,18,256).expect("bad geometry");
    assert_eq!(disk.write_epoch(),0);
    disk.write_sector(0,0,1,&[0;256]).expect("write failed");
    disk.write_sector(0,0,2,&[0;256]).expect("write failed");
    assert_eq!(disk.write_epoch(),2);
    assert!(disk.write_sector(0,0,19,&[0;256]).is_err());
    assert_eq!(disk.write_epoch(),2);
}

#[test]
fn sector_iteration_covers_disk() {
    let mut disk = dckit::create_img(img::DiskImageType::MEM,2,5,18,256).expect("bad geometry");
    disk.write_sector(1,4,18,&[8;256]).expect("write failed");
    let mut count = 0;
    let mut found = false;
    for sec in img::SectorIter::new(disk.as_mut()) {
        let sec = sec.expect("iteration failed");
        count += 1;
        if sec.id.head==1 && sec.id.track==4 && sec.id.sector==18 {
            found = sec.data==vec![8;256];
        }
    }
    assert_eq!(count,2*5*18);
    assert!(found);
}

#[test]
fn dmk_fixture_not_required_for_create_stub() {
    assert!(img::dmk::Dmk::create(1,40,18,256).is_err());
}

#[test]
fn factory_rejects_unknown() {
    assert!(dckit::create_img_from_bytestream(&vec![1,2,3],None).is_err());
    assert!(dckit::create_img_from_file(&Path::new("tests").join("no-such-file.dsk").to_string_lossy()).is_err());
}

#[test]
fn save_and_reload_from_disk() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("scratch.vdk");
    let mut disk = dckit::create_img(img::DiskImageType::VDK,1,40,18,256).expect("bad geometry");
    disk.write_sector(0,5,5,&[0x77;256]).expect("write failed");
    dckit::save_img(&mut disk,&path.to_string_lossy()).expect("save failed");
    let mut disk = dckit::create_img_from_file(&path.to_string_lossy()).expect("could not reopen");
    assert_eq!(disk.what_am_i(),img::DiskImageType::VDK);
    assert_eq!(disk.read_sector(0,5,5).expect("read failed"),vec![0x77;256]);
}

#[test]
fn read_sector_into_partial() {
    let mut disk = dckit::create_img(img::DiskImageType::MEM,1,40,18,256).expect("bad geometry");
    disk.write_sector(0,1,1,&[3;256]).expect("write failed");
    let mut buf = [0u8;16];
    disk.read_sector_into(0,1,1,&mut buf).expect("read failed");
    assert_eq!(buf,[3;16]);
}
