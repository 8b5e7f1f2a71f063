//! `mkfs`: formats a regular file (or block device) as a fresh
//! filesystem image.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use sfs::device::FileDevice;
use sfs::layout::DEFAULT_BLOCK_SIZE;
use sfs::{format, Error};

#[derive(Parser)]
#[command(name = "mkfs", author, version, about = "Format an image as a simple on-disk filesystem")]
struct Cli {
    /// Path to the image file; created if it does not exist and `--size` is given.
    image: PathBuf,

    /// Block size in bytes; must be a multiple of 512.
    #[arg(short = 'b', long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Total image size in bytes, for a newly created image.
    #[arg(short, long)]
    size: Option<u64>,
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut open_opts = OpenOptions::new();
    open_opts.read(true).write(true);
    if let Some(size) = cli.size {
        open_opts.create(true);
        let file = open_opts.open(&cli.image)?;
        file.set_len(size)?;
        format_file(file, cli.block_size)
    } else {
        let file = open_opts.open(&cli.image)?;
        format_file(file, cli.block_size)
    }
}

fn format_file(file: std::fs::File, block_size: u32) -> Result<(), Error> {
    let len = file.metadata()?.len();
    let n_blocks = (len / block_size as u64) as u32;
    let mut dev = FileDevice::new(file, block_size);
    let sb = format(&mut dev, n_blocks)?;
    println!(
        "sfs: {} blocks, {} inodes, data region starts at block {}",
        sb.n_blocks,
        sb.n_inodes,
        sb.data_block_start()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ Error::InvalidArg(_)) => {
            error!("{e}");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}
