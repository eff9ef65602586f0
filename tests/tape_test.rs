// test of the cassette module against a recorded fixture
use std::path::Path;
use dckit::tape;

#[test]
fn read_fixture_tape() {
    let dat = std::fs::read(&Path::new("tests").join("tunes.cas")).expect("failed to read fixture");
    let mut cas = tape::CasTape::from_bytes(&dat);
    let header = tape::read_block(&mut cas,16).expect("no header block");
    header.validate().expect("header block damaged");
    assert_eq!(header.checksum,0x07);
    let decoded = header.header().expect("not a header block");
    assert_eq!(decoded.filename,"FOOBAR");
    assert!(matches!(decoded.file_type,tape::FileType::Basic));
    assert!(!decoded.is_ascii);
    assert!(!decoded.is_gapped);
    let first = tape::read_block(&mut cas,1).expect("no data block");
    first.validate().expect("data block damaged");
    assert_eq!(first.payload,(0..64).collect::<Vec<u8>>());
    let second = tape::read_block(&mut cas,1).expect("no data block");
    second.validate().expect("data block damaged");
    assert_eq!(second.payload,vec![7;10]);
    let eof = tape::read_block(&mut cas,1).expect("no eof block");
    assert!(eof.is_eof());
    eof.validate().expect("eof block damaged");
}
