use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use bytescope::engine::{build_context, trace_method, Engine};
use bytescope::rules::RuleMetadata;
use bytescope::scan::scan_inputs;
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, MultiformatMessageString, ReportingDescriptor, Result as SarifResult,
    Run, Sarif, Tool, ToolComponent, SCHEMA_URL,
};

/// CLI arguments for bytescope execution.
#[derive(Parser, Debug)]
#[command(
    name = "bytescope",
    about = "Operand-stack and class-hierarchy analysis of JVM class files and JAR files, reported as SARIF.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    /// Run only the rule with this id; repeat to select several.
    #[arg(long = "rule", value_name = "ID")]
    rules: Vec<String>,
    /// Print the operand stack before each instruction of methods with this
    /// name as JSON lines instead of SARIF.
    #[arg(long, value_name = "NAME")]
    trace_method: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.quiet);
    run(cli)
}

fn init_logger(quiet: bool) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter(quiet)))
        .init();
}

/// Log filter used when `RUST_LOG` is unset.
fn default_filter(quiet: bool) -> &'static str {
    if quiet { "error" } else { "warn" }
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    let engine = Engine::with_rules(&cli.rules)?;

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let class_count = scan.class_count();
    let artifact_count = scan.artifacts.len();
    let scanned_at = Instant::now();
    let context = build_context(scan.classes, scan.library_classes);

    let mut writer = output_writer(cli.output.as_deref())?;
    if let Some(method_name) = &cli.trace_method {
        let traced = trace_method(&context, method_name, &mut writer)?;
        if traced == 0 {
            anyhow::bail!("no method named {} in the input", method_name);
        }
        return Ok(());
    }

    let output = engine.analyze(&context)?;
    let result_count = output.results.len();
    let invocation = build_invocation();
    let sarif = build_sarif(
        scan.artifacts,
        invocation,
        engine.rule_metadata(),
        output.results,
    );

    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} analysis_ms={} classes={} artifacts={} results={} resolutions={}",
            started_at.elapsed().as_millis(),
            (scanned_at - started_at).as_millis(),
            scanned_at.elapsed().as_millis(),
            class_count,
            artifact_count,
            result_count,
            output.resolutions
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<RuleMetadata>,
    results: Vec<SarifResult>,
) -> Sarif {
    let descriptors = rules
        .into_iter()
        .map(|rule| {
            ReportingDescriptor::builder()
                .id(rule.id)
                .name(rule.name)
                .short_description(
                    MultiformatMessageString::builder()
                        .text(rule.description)
                        .build(),
                )
                .build()
        })
        .collect::<Vec<_>>();
    let driver = ToolComponent::builder()
        .name("bytescope")
        .rules(descriptors)
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sarif_lists_rules_and_results() {
        let invocation = Invocation::builder()
            .execution_successful(true)
            .arguments(Vec::<String>::new())
            .build();
        let engine = Engine::new();
        let result = SarifResult::builder()
            .message(
                serde_sarif::sarif::Message::builder()
                    .text("idiv by constant zero")
                    .build(),
            )
            .rule_id("DIVIDE_BY_ZERO")
            .build();
        let sarif = build_sarif(Vec::new(), invocation, engine.rule_metadata(), vec![result]);
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");

        assert_eq!(value["version"], "2.1.0");
        assert_eq!(value["$schema"], SCHEMA_URL);
        assert_eq!(value["runs"][0]["tool"]["driver"]["name"], "bytescope");
        assert_eq!(
            value["runs"][0]["tool"]["driver"]["rules"][0]["id"],
            "DIVIDE_BY_ZERO"
        );
        assert_eq!(
            value["runs"][0]["results"][0]["ruleId"],
            "DIVIDE_BY_ZERO"
        );
        assert_eq!(
            value["runs"][0]["invocations"][0]["executionSuccessful"],
            true
        );
    }

    #[test]
    fn quiet_lowers_default_log_filter() {
        assert_eq!("error", default_filter(true));
        assert_eq!("warn", default_filter(false));
    }

    #[test]
    fn run_rejects_missing_input() {
        let cli = Cli::parse_from(["bytescope", "--input", "/nonexistent/App.class"]);

        let err = run(cli).expect_err("missing input");

        assert!(err.to_string().contains("input not found"));
    }
}
