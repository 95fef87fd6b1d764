use clap::Parser;
use elf32_loader::image::ImageBuilder;
use std::fs;
use std::path::PathBuf;

/// Write a minimal 32-bit ELF executable whose entry point returns a constant.
#[derive(Parser, Debug)]
#[command(name = "elf32-mkimage", version, about)]
struct Args {
    /// Where to write the image.
    output: PathBuf,

    /// Value the entry point returns.
    #[arg(long, default_value_t = 42, allow_negative_numbers = true)]
    value: i32,

    /// Link address of the single loadable segment.
    #[arg(long, default_value_t = ImageBuilder::DEFAULT_VADDR, value_parser = parse_u32)]
    vaddr: u32,

    /// Zero-filled bytes appended to the segment in memory only.
    #[arg(long, default_value_t = 0, value_parser = parse_u32)]
    bss: u32,
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .map_or_else(|| s.parse(), |hex| u32::from_str_radix(hex, 16))
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let image = ImageBuilder::returning_at(args.vaddr, args.value, args.bss).build();
    fs::write(&args.output, &image)?;

    eprintln!(
        "wrote {} bytes to {} (entry {:#010x} returns {})",
        image.len(),
        args.output.display(),
        args.vaddr,
        args.value
    );
    Ok(())
}
