use std::path;

use rt::shaders;

// Pre-compiles the kernel IR cache so the driver never recompiles at init
fn main() -> anyhow::Result<()> {
    let parsed = clap::Command::new(env!("CARGO_BIN_NAME"))
        .arg(
            clap::Arg::new("config")
                .long("config")
                .number_of_values(1))
        .arg(
            clap::Arg::new("arch")
                .long("arch")
                .number_of_values(1)
                .value_parser(clap::builder::PossibleValuesParser::new(["maxwell", "pascal", "turing"]))
                .conflicts_with("all"))
        .arg(
            clap::Arg::new("all")
                .long("all")
                .action(clap::ArgAction::SetTrue))
        .arg(
            clap::Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(clap::ArgAction::SetTrue))
        .get_matches();

    let flag = |name: &str| parsed.get_one::<bool>(name).copied().unwrap_or(false);

    let level = if flag("verbose") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    rt::init_logging(level)?;

    let config = match parsed.get_one::<String>("config") {
        Some(config) => rt::Config::load(path::Path::new(config))?,
        None => rt::Config::default(),
    };

    let targets = match parsed.get_one::<String>("arch").map(String::as_str) {
        Some("maxwell") => vec![shaders::Architecture::Maxwell],
        Some("pascal") => vec![shaders::Architecture::Pascal],
        Some(_) => vec![shaders::Architecture::Turing],
        None if flag("all") => shaders::Architecture::ALL.to_vec(),
        None => vec![shaders::Architecture::Turing],
    };

    for arch in targets {
        let ir = shaders::load_or_compile(&config.kernels, arch, &shaders::Preprocessor)?;

        log::info!(
            "{} ready: {} bytes at {}",
            arch.name(),
            ir.text.len(),
            config.kernels.cache_path(arch).display()
        );
    }

    Ok(())
}
