use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use tinct_backend_core::{BackendOptions, BackendRegistry, CommonOptions, OutputContent};
use tinct_backend_glsl::GlslBackend;
use tinct_backend_hlsl::HlslBackend;
use tinct_backend_msl::MslBackend;
use tinct_backend_spirv::SpirvBackend;

/// tinct: WGSL to GLSL, HLSL, MSL and SPIR-V
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input WGSL file
    #[arg(required_unless_present = "list_targets")]
    input: Option<PathBuf>,

    /// Target (default: spirv)
    #[arg(short, long, default_value = "spirv")]
    target: String,

    /// Output path (default: stdout for text targets)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep only this entry point
    #[arg(short, long)]
    entry_point: Option<String>,

    /// GLSL `#version` number, e.g. 300 or 430
    #[arg(long)]
    glsl_version: Option<u32>,

    /// Do not clamp buffer indices and texel coordinates
    #[arg(long)]
    disable_robustness: bool,

    /// Do not zero-initialize workgroup memory
    #[arg(long)]
    disable_workgroup_init: bool,

    /// Override value as NAME=VALUE or ID=VALUE (repeatable)
    #[arg(long = "override", value_name = "NAME=VALUE", value_parser = parse_override)]
    overrides: Vec<(String, f64)>,

    /// Dump the sanitized IR to stderr
    #[arg(long)]
    emit_ir: bool,

    /// Parse and validate without producing output
    #[arg(long)]
    dry_run: bool,

    /// List the available targets and exit
    #[arg(long)]
    list_targets: bool,
}

fn parse_override(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid override '{s}', expected NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid override '{s}', missing name"));
    }
    let value = match value.trim() {
        "true" => 1.0,
        "false" => 0.0,
        v => v
            .parse::<f64>()
            .map_err(|e| format!("invalid override value '{v}': {e}"))?,
    };
    Ok((name.to_string(), value))
}

fn registry() -> BackendRegistry {
    let mut registry = BackendRegistry::with_builtins();
    registry.register(Box::new(GlslBackend::desktop()));
    registry.register(Box::new(GlslBackend::es()));
    registry.register(Box::new(HlslBackend));
    registry.register(Box::new(MslBackend));
    registry.register(Box::new(SpirvBackend));
    registry
}

fn common_options(cli: &Cli) -> CommonOptions {
    let mut common = CommonOptions {
        disable_robustness: cli.disable_robustness,
        disable_workgroup_init: cli.disable_workgroup_init,
        entry_point: cli.entry_point.clone(),
        ..CommonOptions::default()
    };
    for (name, value) in &cli.overrides {
        match name.parse::<u16>() {
            Ok(id) => common.overrides.by_id.insert(id, *value),
            Err(_) => common.overrides.by_name.insert(name.clone(), *value),
        };
    }
    common
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let registry = registry();

    if cli.list_targets {
        for target in registry.list_targets() {
            println!("{target}");
        }
        return Ok(());
    }
    let Some(input) = &cli.input else {
        return Err(miette::miette!("no input file"));
    };

    // 1. Read source file.
    let source = std::fs::read_to_string(input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", input.display()))?;

    // 2. Parse WGSL to IR.
    let module = tinct_parser::parse(&source)
        .map_err(|e| miette::miette!("{}", e.render(&source)))
        .wrap_err("WGSL parse failed")?;

    // 3. Validate.
    tinct_ir::validate(&module)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("invalid module")?;

    // 4. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 5. Backend dispatch.
    let backend = registry.find(&cli.target).ok_or_else(|| {
        let available = registry.list_targets().join(", ");
        miette::miette!("unknown target '{}' (available: {})", cli.target, available)
    })?;

    let opts = BackendOptions {
        common: common_options(&cli),
        glsl_version: cli.glsl_version,
        emit_ir: cli.emit_ir,
    };

    let output = backend
        .compile(&module, &opts)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err_with(|| format!("{} generation failed", backend.name()))?;

    // 6. Print diagnostics and the sanitized IR.
    for diag in &output.diagnostics {
        eprintln!("{:?}: {}", diag.level, diag.message);
    }
    if let Some(ir) = &output.sanitized_ir {
        eprintln!("{ir}");
    }

    // 7. Write output.
    for file in &output.files {
        match (&cli.output, &file.content) {
            (Some(path), OutputContent::Text(text)) => {
                std::fs::write(path, text)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (Some(path), OutputContent::Binary(data)) => {
                std::fs::write(path, data)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (None, OutputContent::Text(text)) => {
                print!("{text}");
            }
            (None, OutputContent::Binary(_)) => {
                return Err(miette::miette!(
                    "{} produces binary output; pass --output",
                    backend.name()
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_values() {
        assert_eq!(parse_override("scale=2.5"), Ok(("scale".to_string(), 2.5)));
        assert_eq!(parse_override("7 = true"), Ok(("7".to_string(), 1.0)));
        assert!(parse_override("scale").is_err());
        assert!(parse_override("=1").is_err());
        assert!(parse_override("scale=fast").is_err());
    }

    #[test]
    fn numeric_override_names_are_ids() {
        let cli = Cli::parse_from(["tinct", "a.wgsl", "--override", "3=1", "--override", "gain=0.5"]);
        let common = common_options(&cli);
        assert_eq!(common.overrides.by_id.get(&3), Some(&1.0));
        assert_eq!(common.overrides.by_name.get("gain"), Some(&0.5));
    }

    #[test]
    fn every_target_is_registered() {
        let registry = registry();
        for target in ["glsl", "glsl-es", "hlsl", "msl", "spirv", "spv", "ir-dump", "wgsl-ir"] {
            assert!(registry.find(target).is_some(), "{target}");
        }
    }

    #[test]
    fn list_targets_needs_no_input() {
        let cli = Cli::try_parse_from(["tinct", "--list-targets"]).unwrap();
        assert!(cli.input.is_none());
        assert!(Cli::try_parse_from(["tinct"]).is_err());
    }
}
