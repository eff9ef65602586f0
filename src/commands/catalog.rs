//! list the files on a disk image

use std::str::FromStr;
use clap::ArgMatches;
use crate::fs::FileSystemType;
use crate::STDRESULT;

pub fn catalog(cmd: &ArgMatches) -> STDRESULT {
    let path = match cmd.get_one::<String>("path") {
        Some(p) => p,
        None => return Err(Box::new(super::CommandError::InvalidCommand))
    };
    let mut disk = match cmd.get_one::<String>("type") {
        Some(s) => {
            let fs_type = FileSystemType::from_str(s)?;
            let img = crate::create_img_from_file(path)?;
            crate::create_fs(fs_type,img)?
        },
        None => crate::create_fs_from_file(path)?
    };
    println!();
    println!("{} file system",disk.what_am_i());
    println!();
    for name in disk.list_files()? {
        match disk.get_file_info(&name) {
            Ok(info) => println!("{:<14} {:>7}  {}",info.name,info.size,info.kind),
            Err(_) => println!("{}",name)
        }
    }
    println!();
    println!("{} bytes free",disk.free()?);
    Ok(())
}
