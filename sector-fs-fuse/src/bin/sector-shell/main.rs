mod cli;

use std::fs;
use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use sector_fs::{FileSystem, SynchDisk};
use sector_fs_fuse::DiskFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let format = matches!(cli.command, Command::Format);
    let device = if format {
        DiskFile::create(&cli.image)?
    } else {
        DiskFile::open(&cli.image)?
    };
    let disk = Arc::new(SynchDisk::new(Arc::new(device)));
    let mut fs = FileSystem::new(disk, format);

    match cli.command {
        Command::Format => println!("formatted {:?}", cli.image),
        Command::Cp { source, target } => {
            let data = fs::read(&source)?;
            if !fs.create(&target, data.len() as i64) {
                eprintln!("cp: couldn't create {target}");
                std::process::exit(1);
            }
            let mut file = fs.open(&target).expect("created file must open");
            assert_eq!(file.write_at(&data, 0), data.len());
            println!("copied {} bytes to {target}", data.len());
        }
        Command::Cat { path } => match fs.open(&path) {
            Some(mut file) => {
                let mut data = vec![0u8; file.length()];
                file.read_at(&mut data, 0);
                io::Write::write_all(&mut io::stdout(), &data)?;
            }
            None => {
                eprintln!("cat: unable to open {path}");
                std::process::exit(1);
            }
        },
        Command::Ls => print!("{}", fs.list()),
        Command::Mkdir { path } => {
            if !fs.create(&path, -1) {
                eprintln!("mkdir: couldn't create {path}");
                std::process::exit(1);
            }
        }
        Command::Rm { path } => {
            if !fs.remove(&path) {
                eprintln!("rm: couldn't remove {path}");
                std::process::exit(1);
            }
        }
        Command::Print => print!("{}", fs.print()),
    }

    fs.flush();
    Ok(())
}
