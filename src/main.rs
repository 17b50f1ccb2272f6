use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, CommandFactory, Parser};
use log::LevelFilter;
use simplelog::{ColorChoice, TermLogger, TerminalMode};

use odt_mill::config::{
    find_default_config, init_default_config, load_config, AppConfig, RenderMode, CONFIG_FILENAME,
};
use odt_mill::data::{BookData, DocumentData, ReportData};
use odt_mill::odt::creator::{create_template, TemplateSpec};
use odt_mill::odt::{verify_package_roundtrip, OdtPackage, OdtTemplate};
use odt_mill::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "odt-mill")]
#[command(about = "Mail-merge for OpenDocument text templates", long_about = None)]
struct Args {
    /// Generate the default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Template .odt
    #[arg(value_name = "TEMPLATE")]
    input: Option<PathBuf>,

    /// Output file (default: <input_stem>_filled.odt)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Data JSON (default: read stdin)
    #[arg(long, value_name = "JSON")]
    data: Option<PathBuf>,

    /// Template mode: report or book (overrides the config file)
    #[arg(long)]
    mode: Option<String>,

    /// Config file path (default: search for odt-mill.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the variables and images the template needs as JSON (to -o when given)
    #[arg(long)]
    structure: bool,

    /// Add template fields from --template-spec to a plain .odt
    #[arg(long, requires = "template_spec")]
    create_template: bool,

    /// Fields/tables JSON for --create-template
    #[arg(long, value_name = "JSON")]
    template_spec: Option<PathBuf>,

    /// Only parse + re-serialize content.xml/styles.xml, verifying nothing changed
    #[arg(long)]
    roundtrip_only: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// No progress messages
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  odt-mill <template.odt> --data data.json -o out.odt\n\nTIPS:\n  - Default config search: {CONFIG_FILENAME} (upwards).\n  - `--structure` lists the fields a template expects.\n"
            );
            return Ok(());
        }
    };

    let cfg = resolve_config(&args, &input)?;
    init_logging(&cfg, args.verbose, args.quiet)?;

    if args.create_template {
        let output = args
            .output
            .clone()
            .context("missing -o/--output for --create-template")?;
        let spec_path = args
            .template_spec
            .as_ref()
            .context("missing --template-spec")?;
        let spec = TemplateSpec::load(spec_path)?;
        create_template(&input, &output, &spec)?;
        progress.info(format!("Template written: {}", output.display()));
        return Ok(());
    }

    if args.roundtrip_only {
        let output = args.output.clone().unwrap_or_else(|| default_output(&input, "roundtrip"));
        let pkg = OdtPackage::read(&input)?;
        let digests = verify_package_roundtrip(&pkg)?;
        for (part, digest) in &digests {
            progress.info(format!("{part}: sha256={digest}"));
        }
        pkg.write_with_replacements(&output, &HashMap::new(), &[])?;
        progress.done("Roundtrip", digests.len());
        return Ok(());
    }

    let mode = match args.mode.as_deref() {
        Some(m) => RenderMode::parse(Some(m))?,
        None => cfg.mode()?,
    };
    progress.info(format!("Reading template: {}", input.display()));
    let template = OdtTemplate::read(&input, mode.template_kind())?
        .with_image_media_type(cfg.image_media_type());

    if args.structure {
        let structure = template.structure();
        match &args.output {
            Some(path) => structure.write(path)?,
            None => println!("{}", String::from_utf8_lossy(&structure.to_json()?)),
        }
        progress.done("Structure", structure.variables.len());
        return Ok(());
    }

    let output = args.output.clone().unwrap_or_else(|| default_output(&input, "filled"));
    let data = read_data(args.data.as_deref(), mode, cfg.header_footer_from_main())?;
    progress.info("Rendering");
    template.write(&output, &data)?;
    progress.info(format!("Written: {}", output.display()));
    Ok(())
}

fn resolve_config(args: &Args, input: &Path) -> anyhow::Result<AppConfig> {
    let workdir = input.parent().unwrap_or_else(|| Path::new("."));
    let path = args
        .config
        .clone()
        .or_else(|| find_default_config(workdir, CONFIG_FILENAME));
    match path {
        Some(p) => load_config(&p),
        None => Ok(AppConfig::default()),
    }
}

fn init_logging(cfg: &AppConfig, verbose: u8, quiet: bool) -> anyhow::Result<()> {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => cfg.log_level()?,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("init logging")
}

fn read_data(
    path: Option<&Path>,
    mode: RenderMode,
    header_footer_from_main: bool,
) -> anyhow::Result<DocumentData> {
    let text = match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("read data: {}", p.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read data from stdin")?;
            buf
        }
    };
    let value: serde_json::Value = serde_json::from_str(&text).context("parse data json")?;
    let data = match mode {
        RenderMode::Report => ReportData::from_json(&value, header_footer_from_main)?.into(),
        RenderMode::Book => BookData::from_json(&value)?.into(),
    };
    Ok(data)
}

fn default_output(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    input.with_file_name(format!("{stem}_{suffix}.odt"))
}
