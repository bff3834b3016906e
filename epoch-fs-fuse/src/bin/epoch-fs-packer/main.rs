mod cli;

use std::fs;
use std::io::{self, Write};

use clap::Parser;
use cli::{Cli, Command};
use epoch_fs::{EpochFileSystem, NodeKind, Stat};
use epoch_fs_fuse::{create_image, open_image, pack, put, read_file};
use typed_bytesize::ByteSizeIec;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let fs = match &cli.command {
        Command::Pack {
            source,
            size,
            versioned,
        } => {
            println!("source={source:?}\nimage={:?}", cli.image);
            let fs = create_image(&cli.image, ByteSizeIec::mib(*size))?;
            let packed = pack(&fs, source, "/", *versioned)?;
            println!("packed {packed} file(s), clock at {}", fs.clock().now());
            fs
        }
        Command::Put {
            host,
            path,
            versioned,
        } => {
            let fs = open_image(&cli.image)?;
            let data = fs::read(host)?;
            let handle = put(&fs, path, &data, *versioned).map_err(io::Error::other)?;
            print_stat(&fs.stat(&handle, None).map_err(io::Error::other)?);
            fs
        }
        Command::Ls { path, at } => {
            let fs = open_image(&cli.image)?;
            for stat in fs.read_dir(path, *at).map_err(io::Error::other)? {
                print_stat(&stat);
            }
            fs
        }
        Command::Cat { path, at } => {
            let fs = open_image(&cli.image)?;
            let data = read_file(&fs, path, *at).map_err(io::Error::other)?;
            io::stdout().write_all(&data)?;
            fs
        }
        Command::Track { path, restore } => {
            let fs = open_image(&cli.image)?;
            if let Some(timestamp) = restore {
                let handle = fs.restore(path, *timestamp).map_err(io::Error::other)?;
                print_stat(&fs.stat(&handle, None).map_err(io::Error::other)?);
            } else {
                for stat in fs.history(path).map_err(io::Error::other)? {
                    print_stat(&stat);
                }
            }
            fs
        }
        Command::Undo { path } => {
            let fs = open_image(&cli.image)?;
            let handle = fs.undo(path).map_err(io::Error::other)?;
            print_stat(&fs.stat(&handle, None).map_err(io::Error::other)?);
            fs
        }
    };

    sync(fs);
    Ok(())
}

fn print_stat(stat: &Stat) {
    let kind = match stat.kind {
        NodeKind::Regular => '-',
        NodeKind::Directory => 'd',
        NodeKind::Versioned => 'v',
    };
    println!(
        "{kind} {:>10} @{:<6} {} {:?}",
        stat.size, stat.timestamp, stat.name, stat.blocks
    );
}

fn sync(fs: EpochFileSystem) {
    fs.sync_all();
    log::info!("synced, clock at {}", fs.clock().now());
}
