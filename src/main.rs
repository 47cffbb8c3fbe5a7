use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use doxyover::template::format::{bundled_names, TemplateFormat};
use doxyover::{Catalogue, Config, Environment, Generator, Template, Value};

fn cli() -> Command {
    Command::new("doxyover")
        .about("Generate documentation from Doxygen XML output")
        .version(env!("CARGO_PKG_VERSION"))
        .args_conflicts_with_subcommands(true)
        .arg(
            Arg::new("index")
                .help("Doxygen index.xml, or the directory holding it")
                .default_value("xml")
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .help("Output format: a bundled format or NAME.dxt in the user formats directory")
                .default_value("markdown"),
        )
        .arg(
            Arg::new("template")
                .short('F')
                .long("template")
                .help("Format template file (overrides -f)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("outdir")
                .short('o')
                .long("outdir")
                .help("Directory for generated files"),
        )
        .arg(
            Arg::new("fileext")
                .short('e')
                .long("fileext")
                .help("Extension of generated files, including the dot"),
        )
        .arg(
            Arg::new("order")
                .long("order")
                .help("Order of entries inside a section")
                .value_parser(["source", "alpha", "doxygen"]),
        )
        .arg(
            Arg::new("define")
                .short('D')
                .value_name("KEY=VALUE")
                .help("Set a configuration value (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("JSON configuration file")
                .value_parser(value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new("template")
                .about("Run a template file, writing its output to stdout")
                .arg(
                    Arg::new("file")
                        .help("Template file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("args")
                        .help("Arguments passed to the template as `argv`")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    for pair in matches.get_many::<String>("define").into_iter().flatten() {
        config.set_pair(pair)?;
    }
    for key in ["order", "outdir", "fileext"] {
        if let Some(value) = matches.get_one::<String>(key) {
            config.set(key, value)?;
        }
    }
    Ok(config)
}

/// `NAME.dxt` in the user's format directory, if present.
fn user_format(name: &str) -> Option<PathBuf> {
    let path = dirs::config_dir()?
        .join("doxyover")
        .join("formats")
        .join(format!("{}.dxt", name));
    path.is_file().then_some(path)
}

fn load_format(matches: &ArgMatches, config: &Config) -> Result<TemplateFormat> {
    if let Some(path) = matches.get_one::<PathBuf>("template") {
        return TemplateFormat::load(path, config)
            .with_context(|| format!("cannot load format template {}", path.display()));
    }

    let name = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("markdown");
    if let Some(path) = user_format(name) {
        info!(format = %name, path = %path.display(), "using user format");
        return TemplateFormat::load(&path, config)
            .with_context(|| format!("cannot load format template {}", path.display()));
    }
    match TemplateFormat::bundled(name, config) {
        Some(format) => Ok(format?),
        None => bail!(
            "unknown format `{}` (available: {})",
            name,
            bundled_names().collect::<Vec<_>>().join(", ")
        ),
    }
}

fn index_path(arg: &Path) -> PathBuf {
    if arg.is_dir() {
        arg.join("index.xml")
    } else {
        arg.to_path_buf()
    }
}

fn generate(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let index = index_path(
        matches
            .get_one::<PathBuf>("index")
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("xml")),
    );

    let catalogue = Catalogue::open(&index)
        .with_context(|| format!("cannot read compound index {}", index.display()))?;
    let mut format = load_format(matches, &config)?;

    let written = Generator::new(&catalogue, &config)
        .generate(&mut format)
        .context("generation failed")?;
    info!(files = written.len(), outdir = %config.outdir.display(), "done");
    Ok(())
}

fn run_template(matches: &ArgMatches) -> Result<()> {
    let Some(file) = matches.get_one::<PathBuf>("file") else {
        bail!("no template file given");
    };
    let template = Template::load(file)?;

    let mut argv = vec![Value::Str(file.display().to_string())];
    argv.extend(
        matches
            .get_many::<String>("args")
            .into_iter()
            .flatten()
            .map(|arg| Value::Str(arg.clone())),
    );
    let mut env = Environment::new().with("argv", Value::List(argv));
    template.execute_to_stdout(&mut env)?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("template", sub)) => run_template(sub),
        _ => generate(&matches),
    }
}
