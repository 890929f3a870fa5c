#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!(
        "The dualdsp-synth inspector requires the \"cli\" feature. Rebuild with `--features cli` to enable it."
    );
}

#[cfg(feature = "cli")]
mod cli {
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::{bail, Context};
    use dualdsp_synth::firmware::ImageSource;
    use dualdsp_synth::{DeviceModel, FirmwareImage, PresetBank};

    /// Preset names printed per bank
    const NAMES_SHOWN: usize = 8;

    struct Options {
        file: PathBuf,
        model: Option<DeviceModel>,
        extract_dir: Option<PathBuf>,
    }

    fn usage() {
        eprintln!(
            "Usage:\n  dualdsp-synth [--model <model>] [--extract-presets <dir>] <firmware>\n\nFlags:\n  --model <model>            ti (default for installers), ti2, snow, a, b, c/abc (default for ROM dumps)\n  --extract-presets <dir>    Write every preset bank to <dir>\n  -h, --help                 Show this help\n"
        );
    }

    fn parse_args() -> anyhow::Result<Option<Options>> {
        let mut file = None;
        let mut model = None;
        let mut extract_dir = None;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => return Ok(None),
                "--model" => {
                    let value = args.next().context("--model requires an argument")?;
                    model = Some(value.parse::<DeviceModel>()?);
                }
                "--extract-presets" => {
                    let value = args
                        .next()
                        .context("--extract-presets requires a directory")?;
                    extract_dir = Some(PathBuf::from(value));
                }
                _ if arg.starts_with("--model=") => {
                    model = Some(arg["--model=".len()..].parse::<DeviceModel>()?);
                }
                _ if arg.starts_with('-') => bail!("Unknown flag: {arg}"),
                _ => file = Some(PathBuf::from(arg)),
            }
        }

        Ok(file.map(|file| Options {
            file,
            model,
            extract_dir,
        }))
    }

    fn bank_name(image: &FirmwareImage, index: usize) -> String {
        match (image.source(), index) {
            (ImageSource::RomDump, 0) => "multi".to_string(),
            (ImageSource::RomDump, _) => "single".to_string(),
            _ => format!("bank{index}"),
        }
    }

    fn preset_name(image: &FirmwareImage, bank_index: usize, bank: &PresetBank, record: usize) -> Option<String> {
        let record = bank.record(record)?;
        let name = if image.source() == ImageSource::RomDump && bank_index == 0 {
            record.multi_name()
        } else {
            record.single_name()
        };
        Some(name)
    }

    fn extract(image: &FirmwareImage, dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create '{}'", dir.display()))?;

        for (i, bank) in image.preset_banks().iter().enumerate() {
            let path = dir.join(format!("{}.bin", bank_name(image, i)));
            fs::write(&path, bank.raw())
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            println!("Wrote {} ({} bytes)", path.display(), bank.raw().len());

            if let Some(aux) = bank.aux_bank() {
                let path = dir.join(format!("{}_aux.bin", bank_name(image, i)));
                fs::write(&path, aux)
                    .with_context(|| format!("Failed to write '{}'", path.display()))?;
                println!("Wrote {} ({} bytes)", path.display(), aux.len());
            }
        }
        Ok(())
    }

    pub fn run() -> anyhow::Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        let Some(options) = parse_args()? else {
            usage();
            return Ok(());
        };

        let data = fs::read(&options.file)
            .with_context(|| format!("Failed to read '{}'", options.file.display()))?;

        let model = options.model.unwrap_or_else(|| {
            if dualdsp_synth::firmware::is_installer(&data) {
                DeviceModel::Ti
            } else {
                DeviceModel::C
            }
        });

        let image = FirmwareImage::load(&data, model)
            .with_context(|| format!("Failed to decode '{}' as {}", options.file.display(), model))?;

        println!("File:            {}", options.file.display());
        println!("Model:           {}", model);
        println!(
            "Container:       {}",
            match image.source() {
                ImageSource::Installer => "installer",
                ImageSource::RomDump => "ROM dump",
                ImageSource::Empty => "empty",
            }
        );
        println!(
            "Boot code:       {} words at P:0x{:06x}",
            image.boot_code().len(),
            image.boot_offset()
        );
        println!("Command stream:  {} words", image.command_stream().len());
        println!("Preset banks:    {}", image.preset_banks().len());

        for (i, bank) in image.preset_banks().iter().enumerate() {
            let layout = bank.layout();
            println!(
                "\n[{}] {} bytes, {} records of {} bytes{}",
                bank_name(&image, i),
                layout.file_size,
                layout.record_count,
                layout.record_size,
                if bank.aux_bank().is_some() { ", aux bank" } else { "" }
            );
            for record in 0..bank.record_count().min(NAMES_SHOWN) {
                if let Some(name) = preset_name(&image, i, bank, record) {
                    println!("  {:3}  {}", record, name);
                }
            }
        }

        if let Some(dir) = options.extract_dir {
            if image.preset_banks().is_empty() {
                bail!("No preset banks to extract");
            }
            println!();
            extract(&image, &dir)?;
        }

        Ok(())
    }
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    cli::run()
}
