//! dump the blocks of a cassette image

use clap::ArgMatches;
use crate::tape;
use crate::STDRESULT;

pub fn dump(cmd: &ArgMatches) -> STDRESULT {
    let path = match cmd.get_one::<String>("path") {
        Some(p) => p,
        None => return Err(Box::new(super::CommandError::InvalidCommand))
    };
    let dat = std::fs::read(path)?;
    let mut cas = tape::CasTape::from_bytes(&dat);
    let mut count = 0;
    loop {
        match tape::read_block(&mut cas,1) {
            Ok(block) => {
                let status = match block.validate() {
                    Ok(()) => "checksum ok",
                    Err(_) => "checksum BAD"
                };
                let preview = usize::min(block.payload.len(),16);
                println!("block {:3}: {}, {}  {}",count,block,status,
                    hex::encode_upper(&block.payload[0..preview]));
                if let Some(header) = block.header() {
                    println!("           file `{}`  start {:04X}  load {:04X}",
                        header.filename,header.start_address,header.load_address);
                }
                count += 1;
            },
            Err(e) => match e.downcast_ref::<tape::Error>() {
                Some(tape::Error::EndOfTape) => break,
                _ => return Err(e)
            }
        }
    }
    println!("{} blocks",count);
    Ok(())
}
