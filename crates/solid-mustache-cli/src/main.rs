//! solid-mustache CLI - compiles a template file into a Solidity library

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solid_mustache::{CompileOptions, compile};

#[derive(Parser, Debug)]
#[command(name = "solid-mustache")]
#[command(version)]
#[command(about = "Compile Handlebars templates to Solidity", long_about = None)]
struct Cli {
    /// Template file to compile
    template: PathBuf,

    /// Output file (.sol) or directory; defaults to the template's directory
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// JSON file with compile options
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the generated library or contract
    #[arg(long)]
    name: Option<String>,

    /// Emit a contract instead of a library
    #[arg(long)]
    contract: bool,

    /// Partial template (NAME=FILE), can be given multiple times
    #[arg(long = "partial", value_name = "NAME=FILE")]
    partials: Vec<String>,

    /// Collapse whitespace runs in template text
    #[arg(long)]
    condense_whitespace: bool,

    /// Shortest repeated substring to factor into a constant
    #[arg(long, value_name = "N")]
    min_repeating_substring_length: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solid_mustache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let out = run(&cli)?;
    info!("Successfully compiled to {}", out.display());
    Ok(())
}

/// Compile the template named on the command line and write the result,
/// returning the path written.
fn run(cli: &Cli) -> Result<PathBuf> {
    let template = fs::read_to_string(&cli.template)
        .with_context(|| format!("Failed to read template {}", cli.template.display()))?;
    let options = load_options(cli)?;
    let out = output_path(&cli.template, cli.out.as_deref())?;

    let source = compile(&template, &options)
        .with_context(|| format!("Failed to compile {}", cli.template.display()))?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(&out, source).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(out)
}

/// Options from `--config`, overridden by explicit flags.
fn load_options(cli: &Cli) -> Result<CompileOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            CompileOptions::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => CompileOptions::default(),
    };

    if let Some(name) = &cli.name {
        options.name = name.clone();
    }
    if cli.contract {
        options.contract = true;
    }
    if cli.condense_whitespace {
        options.condense_whitespace = true;
    }
    if let Some(min) = cli.min_repeating_substring_length {
        options.min_repeating_substring_length = min;
    }

    for arg in &cli.partials {
        let (name, file) = parse_partial_arg(arg)?;
        let source = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read partial {} from {}", name, file.display()))?;
        options.partials.insert(name, source);
    }

    Ok(options)
}

fn parse_partial_arg(arg: &str) -> Result<(String, PathBuf)> {
    match arg.split_once('=') {
        Some((name, file)) if !name.is_empty() && !file.is_empty() => {
            Ok((name.to_string(), PathBuf::from(file)))
        }
        _ => bail!("Invalid partial '{}', expected NAME=FILE", arg),
    }
}

/// Where to write the compiled source.
///
/// Without `--out` the `.sol` file lands next to the template. An `--out`
/// without extension names a directory.
fn output_path(template: &Path, out: Option<&Path>) -> Result<PathBuf> {
    let stem = template
        .file_stem()
        .with_context(|| format!("Template path {} has no file name", template.display()))?;
    let file_name = PathBuf::from(stem).with_extension("sol");

    let Some(out) = out else {
        let dir = template.parent().unwrap_or_else(|| Path::new(""));
        return Ok(dir.join(file_name));
    };

    match out.extension().and_then(|ext| ext.to_str()) {
        None => Ok(out.join(file_name)),
        Some("sol") => Ok(out.to_path_buf()),
        Some(ext) => bail!("Output file must have a .sol extension, got .{}", ext),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cli(template: PathBuf) -> Cli {
        Cli {
            template,
            out: None,
            config: None,
            name: None,
            contract: false,
            partials: Vec::new(),
            condense_whitespace: false,
            min_repeating_substring_length: None,
        }
    }

    #[test]
    fn test_output_path_defaults_to_template_dir() {
        let path = output_path(Path::new("templates/badge.hbs"), None).unwrap();
        assert_eq!(path, PathBuf::from("templates/badge.sol"));
    }

    #[test]
    fn test_output_path_directory_and_file() {
        let template = Path::new("badge.hbs");
        assert_eq!(
            output_path(template, Some(Path::new("build/contracts"))).unwrap(),
            PathBuf::from("build/contracts/badge.sol")
        );
        assert_eq!(
            output_path(template, Some(Path::new("out/Badge.sol"))).unwrap(),
            PathBuf::from("out/Badge.sol")
        );
        assert!(output_path(template, Some(Path::new("out/badge.txt"))).is_err());
    }

    #[test]
    fn test_parse_partial_arg() {
        let (name, file) = parse_partial_arg("row=partials/row.hbs").unwrap();
        assert_eq!(name, "row");
        assert_eq!(file, PathBuf::from("partials/row.hbs"));
        assert!(parse_partial_arg("row").is_err());
        assert!(parse_partial_arg("=row.hbs").is_err());
    }

    #[test]
    fn test_run_writes_compiled_source() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("card.hbs");
        let partial = dir.path().join("title.hbs");
        fs::write(&template, "<div>{{> title heading}}</div>").unwrap();
        fs::write(&partial, "<h1>{{text}}</h1>").unwrap();

        let mut args = cli(template);
        args.out = Some(dir.path().join("nested/out"));
        args.name = Some("Card".to_string());
        args.partials = vec![format!("title={}", partial.display())];

        let out = run(&args).unwrap();
        assert_eq!(out, dir.path().join("nested/out/card.sol"));
        let source = fs::read_to_string(out).unwrap();
        assert!(source.contains("library Card {"));
        assert!(source.contains("function title(Heading memory __input) internal pure"));
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("options.json");
        let json = r#"{ "name": "FromConfig", "contract": false, "tabWidth": 2 }"#;
        fs::write(&config, json).unwrap();

        let mut args = cli(dir.path().join("t.hbs"));
        args.config = Some(config);
        args.contract = true;
        args.min_repeating_substring_length = Some(32);

        let options = load_options(&args).unwrap();
        assert_eq!(options.name, "FromConfig");
        assert!(options.contract);
        assert_eq!(options.min_repeating_substring_length, 32);
        assert_eq!(options.formatting.tab_width, 2);
    }

    #[test]
    fn test_compile_error_is_reported_with_template_name() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("empty.hbs");
        fs::write(&template, "no expressions here").unwrap();

        let err = run(&cli(template)).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to compile"));
        assert!(message.contains("does not contain any template expressions"));
    }
}
