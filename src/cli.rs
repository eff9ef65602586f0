//! build the clap command tree

use clap::{arg,crate_version,Command};

pub fn build_cli() -> Command {
    Command::new("dckit")
        .about("Dragon and CoCo disk image and cassette utility")
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("dumptape")
            .arg(arg!(<path> "path to the CAS image"))
            .about("Read a cassette image and print a block summary"))
        .subcommand(Command::new("catalog")
            .arg(arg!(<path> "path to the disk image"))
            .arg(arg!(-t --type <fs> "file system on the image (dragondos|rsdos|flex|os9)").required(false))
            .about("List the files on a disk image"))
}
