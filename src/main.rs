mod cli;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::Style;

use cellsmith::backend;
use cellsmith::sink::Sheet;
use cellsmith::template::TemplateRegistry;
use cellsmith::{CancelToken, CellRange, Engine, EngineConfig, JobSpec};
use cli::{Cli, Command};

/// Name given to a template supplied with `--prompt`.
const AD_HOC_TEMPLATE: &str = "ad-hoc";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = ui::TerminalLogger::init(cli.verbose) {
        eprintln!("logger already initialised: {err}");
    }

    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Run {
            sheet,
            range,
            template,
            prompt,
            vars,
            out,
            backend,
            model,
            concurrency,
            max_attempts,
        } => {
            let mut config = config;
            if let Some(backend) = backend {
                config.backend = backend.into();
            }
            if model.is_some() {
                config.model = model;
            }
            if let Some(n) = concurrency {
                config.concurrency = n;
            }
            if let Some(n) = max_attempts {
                config.max_attempts = n;
            }
            config.validate()?;

            let out = out.unwrap_or_else(|| sheet.clone());
            run(config, RunArgs {
                sheet,
                range,
                template,
                prompt,
                vars,
                out,
            })
            .await
        }
        Command::Templates => {
            let registry = TemplateRegistry::with_presets();
            let bold = Style::new().bold();
            for name in registry.names() {
                if let Some(template) = registry.get(&name) {
                    let first_line = template.body().lines().next().unwrap_or_default();
                    println!("  {:<18} {first_line}", bold.apply_to(&name));
                }
            }
            Ok(())
        }
        Command::Check => {
            let descriptor = config.descriptor();
            log::info!(
                "checking {} backend at {} ({})",
                descriptor.kind,
                descriptor.endpoint,
                descriptor.model
            );
            let adapter = backend::connect(&descriptor);
            let reply = backend::check_connection(adapter.as_ref())
                .await
                .with_context(|| format!("{} backend did not answer", descriptor.kind))?;
            println!("  {} {reply}", Style::new().green().bold().apply_to("✓"));
            Ok(())
        }
    }
}

struct RunArgs {
    sheet: PathBuf,
    range: String,
    template: Option<String>,
    prompt: Option<String>,
    vars: Vec<(String, String)>,
    out: PathBuf,
}

async fn run(config: EngineConfig, args: RunArgs) -> Result<()> {
    let registry = Arc::new(TemplateRegistry::with_presets());
    for (name, _) in &args.vars {
        registry.declare_variable(name);
    }
    let template = match (args.template, args.prompt) {
        (Some(name), None) => name,
        (None, Some(body)) => {
            registry.register(AD_HOC_TEMPLATE, &body)?;
            AD_HOC_TEMPLATE.to_string()
        }
        _ => bail!("exactly one of --template or --prompt is required"),
    };

    let range: CellRange = args.range.parse()?;
    let mut sheet = Sheet::load(&args.sheet)
        .with_context(|| format!("reading sheet {}", args.sheet.display()))?;

    let mut spec = JobSpec::new(range, template, config.descriptor())
        .with_concurrency(config.concurrency)
        .with_params(config.generation_params())
        .with_retry(config.retry_policy())
        .with_per_call_timeout(config.per_call_timeout());
    for (name, value) in args.vars {
        spec = spec.with_variable(name, value);
    }

    let engine = Engine::new(registry, Arc::new(config.governor()));
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling remaining cells");
            on_interrupt.cancel();
        }
    });

    let progress = ui::RunProgress::follow(engine.events().subscribe(), &args.range);
    let result = match engine.execute(&mut sheet, spec, &cancel).await {
        Ok(result) => {
            progress.finish().await;
            result
        }
        Err(err) => {
            progress.abandon();
            return Err(err.into());
        }
    };

    sheet
        .save(&args.out)
        .with_context(|| format!("writing sheet {}", args.out.display()))?;
    ui::print_result(&result);

    if result.failed > 0 || result.cancelled > 0 {
        std::process::exit(1);
    }
    Ok(())
}
